use resq_api::{Client, SavePersonStatusInput};
use resq_core::PersonnelStatusInput;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("tracing=info,save_status=info,resq_api=debug")
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let base_url =
        std::env::var("RESQ_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8080/api/v4".into());

    let mut client = match Client::new(&base_url) {
        Ok(client) => client,
        Err(e) => {
            error!("invalid api url: {}", e);
            std::process::exit(1);
        }
    };
    if let Ok(token) = std::env::var("RESQ_API_TOKEN") {
        client = client.with_token(token);
    }

    let mut status = PersonnelStatusInput::new("example-user", "1");
    status.note = Some("en route".into());
    let input = SavePersonStatusInput::from(&status);

    info!("saving personnel status at {}", base_url);
    match client.save_personnel_status(&input).await {
        Ok(result) => {
            info!("status saved: id = {}, status = {}", result.id, result.status);
        }
        Err(e) => {
            error!("save failed: {}", e);
            std::process::exit(1);
        }
    }
}
