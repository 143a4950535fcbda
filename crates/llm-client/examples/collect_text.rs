use llm_client::observability::init_observability;
use llm_client::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_observability();
    let client = Client::from_env()?;
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4.1-mini".to_string());

    let mut conversation = Conversation::new(model).instructions("Answer briefly.");

    let first = client
        .create_response(conversation.request("Pick a colour.").store(true))
        .await?;
    println!("{}", first.output_text());
    conversation.record(&first);

    let text = client
        .stream_response(conversation.request("Why that one?"))
        .await?
        .collect_text()
        .await?;
    println!("{text}");
    Ok(())
}
