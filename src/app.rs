use tracing::info;

use crate::application::use_cases::pipeline::Pipeline;
use crate::domain::error::Result;
use crate::domain::response::RunReport;
use crate::infrastructure::config::Settings;
use crate::infrastructure::sharepoint::SharePointClient;
use crate::infrastructure::telegram::TelegramNotifier;

/// Load configuration, run every configured survey through the pipeline, and
/// deliver the status notification. Per-survey failures end up in the report;
/// only configuration and notification problems surface as errors here.
pub async fn run() -> Result<RunReport> {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let sink = SharePointClient::new(settings.sharepoint.clone())?;
    let notifier = TelegramNotifier::new(settings.telegram.clone());

    let report = Pipeline::new(settings, sink, notifier).run().await?;
    info!(
        "Run complete: {} surveys attempted, {} failed",
        report.attempted(),
        report.failed()
    );
    Ok(report)
}
