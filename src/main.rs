use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

use push_notify::{
    api::ApiClient,
    config::Config,
    controller::{ControllerOptions, SubscriptionController},
    sim::{SimulatedBrowser, SimulatedWorkerHost},
    state::SubscriptionSession,
    worker::{PushEvent, WorkerEvent, WorkerOptions, WorkerRuntime},
};

#[derive(Parser, Debug)]
#[command(
    name = "push-notify",
    version,
    about = "Exercise the push subscription flow and notification worker"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask the backend to push a notification to every subscriber.
    SendTest {
        #[arg(long, default_value = "Test notification")]
        title: String,
        #[arg(long, default_value = "Push notifications are working")]
        body: String,
    },
    /// Run the full subscribe flow against a simulated browser and register
    /// the result with the backend.
    Subscribe,
    /// Feed a push body to the worker and print the notification it renders.
    Render {
        /// Raw push body; omitted means no payload.
        payload: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = Config::from_env()?;

    match cli.command {
        Command::SendTest { title, body } => {
            let controller = controller(&cfg)?;
            if !controller.send_test_notification(&title, &body).await {
                anyhow::bail!("backend did not accept the test notification");
            }
            info!("test notification accepted");
        }
        Command::Subscribe => {
            let controller = controller(&cfg)?;
            controller.subscribe().await?;
            println!("{}", serde_json::to_string_pretty(&controller.status())?);
            if let Some(endpoint) = controller.endpoint() {
                println!("endpoint: {endpoint}");
            }
        }
        Command::Render { payload } => {
            let host = SimulatedWorkerHost::new(&cfg.app_origin)?;
            let worker = WorkerRuntime::new(host, WorkerOptions::default());
            worker.dispatch(WorkerEvent::Install).await?;
            worker.dispatch(WorkerEvent::Activate).await?;
            let event = PushEvent {
                data: payload.map(String::into_bytes),
            };
            worker.dispatch(WorkerEvent::Push(event)).await?;
            for request in worker.host().shown() {
                println!("{}", serde_json::to_string_pretty(&request)?);
            }
        }
    }

    Ok(())
}

fn controller(
    cfg: &Config,
) -> anyhow::Result<SubscriptionController<SimulatedBrowser, Option<String>>> {
    let api = ApiClient::new(&cfg.api_base, cfg.http_timeout())?;
    Ok(SubscriptionController::new(
        SimulatedBrowser::new(),
        api,
        cfg.admin_token.clone(),
        ControllerOptions::default(),
        SubscriptionSession::default(),
    ))
}
