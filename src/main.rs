use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match survey_harvest::app::run().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("Run aborted: {}", err);
            ExitCode::FAILURE
        }
    }
}
