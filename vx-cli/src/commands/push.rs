//! Push registration commands.

use clap::Subcommand;
use console::style;

use vx_core::config::ConfigHandle;
use vx_core::error::VxResult;
use vx_services::ServiceRegistry;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum PushAction {
    /// Register this device's pusher with every session.
    Register {
        /// Provider token to register with (defaults to the stored token).
        #[arg(short, long)]
        token: Option<String>,
    },
    /// Remove this device's pusher from every session.
    Unregister,
    /// Recreate every session's pusher with the current preferences.
    Force,
    /// Remove pushers and forget the provider token.
    Reset,
    /// Adopt a new provider token, moving every pusher over to it.
    Token {
        /// The new provider token.
        token: String,
    },
}

pub async fn run(config: ConfigHandle, action: PushAction, format: OutputFormat) -> VxResult<()> {
    let (registry, verb) = match action {
        PushAction::Register { token } => {
            let registry = super::build_registry(&config, token).await?;
            registry.coordinator().register().await?;
            (registry, "registered")
        }
        PushAction::Unregister => {
            let registry = super::build_registry(&config, None).await?;
            registry.coordinator().unregister().await?;
            (registry, "unregistered")
        }
        PushAction::Force => {
            let registry = super::build_registry(&config, None).await?;
            registry.coordinator().force_sessions_registration().await?;
            (registry, "re-registered")
        }
        PushAction::Reset => {
            let registry = super::build_registry(&config, None).await?;
            registry.coordinator().reset_registration().await?;
            (registry, "reset")
        }
        PushAction::Token { token } => {
            let registry = super::build_registry(&config, None).await?;
            registry.coordinator().on_token_refreshed(token).await?;
            (registry, "token updated")
        }
    };

    report(&registry, verb, format).await;
    registry.shutdown_all().await
}

async fn report(registry: &ServiceRegistry, verb: &str, format: OutputFormat) {
    let coordinator = registry.coordinator();
    let state = coordinator.current_state().await;
    let sessions = coordinator.session_user_ids().await;
    let listed = coordinator.refresh_pushers_list().await;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "result": verb,
                    "state": state.tag(),
                    "sessions": sessions,
                })
            );
        }
        OutputFormat::Text => {
            println!(
                "  {} Push {verb}, state is {}.",
                style("OK").green().bold(),
                style(state).cyan()
            );
            if let Err(e) = &listed {
                println!("    {} could not list pushers: {e}", style("WARN").yellow());
                return;
            }
            for user_id in &sessions {
                let mark = if coordinator.is_pusher_registered(user_id).await {
                    style("pusher").green()
                } else {
                    style("no pusher").dim()
                };
                println!("    {user_id}: {mark}");
            }
        }
    }
}
