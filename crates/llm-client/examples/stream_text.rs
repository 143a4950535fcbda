use std::io::Write as _;

use llm_client::observability::init_observability;
use llm_client::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_observability();
    let client = Client::from_env()?;
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4.1-mini".to_string());

    let request = ResponseRequest::new(model, "Stream a short greeting.")
        .instructions("Reply in one sentence.")
        .store(false);
    let mut session = client.stream_response(request).await?;

    let mut stdout = std::io::stdout();
    while let Some(event) = session.next_event().await {
        match event {
            ResponseEvent::OutputTextDelta(delta) => {
                print!("{}", delta.delta);
                stdout.flush()?;
            }
            ResponseEvent::Completed(_) => println!(),
            ResponseEvent::Unknown(unknown) => eprintln!("[unhandled event {}]", unknown.name),
            _ => {}
        }
    }

    if let Some(err) = session.err() {
        return Err(err.clone().into());
    }
    if let Some(id) = session.response_id() {
        eprintln!("response id: {id}");
    }
    Ok(())
}
