use std::env;
use std::sync::Arc;

use aegis_warden::config::BotConfig;
use aegis_warden::discord::{DiscordIdentity, DiscordMembership};
use aegis_warden::moderation::{Collaborators, ModerationScheduler, SystemClock, YamlDirBackend};
use aegis_warden::{CONSOLE_TARGET, Data, Error, commands, handlers, logging};
use dashmap::DashMap;
use poise::serenity_prelude::{self as serenity};
use serenity::GatewayIntents;
use tracing::{error, info, warn};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    let config_path = BotConfig::path();
    let config = BotConfig::load(&config_path).await;

    logging::init(&config.log_dir)?;

    let token = env::var("DISCORD_TOKEN").map_err(|_| "DISCORD_TOKEN must be set")?;

    // Guild settings are shared by the commands and the notification adapter
    let guild_configs: Arc<DashMap<u64, _>> = Arc::new(config.guilds.clone().into_iter().collect());
    let http = Arc::new(serenity::Http::new(&token));

    let backend = YamlDirBackend::open(&config.data_dir).await?;
    let collaborators = Collaborators {
        membership: Arc::new(DiscordMembership::new(http, Arc::clone(&guild_configs))),
        identity: Arc::new(DiscordIdentity),
        clock: Arc::new(SystemClock),
    };
    let (scheduler, report) =
        ModerationScheduler::start(Arc::new(backend), collaborators, config.scheduler_policy()).await;
    info!(
        target: CONSOLE_TARGET,
        armed = report.armed.len(),
        stale = report.stale.len(),
        "Moderation state restored"
    );

    let data = Data::new(config, config_path, guild_configs, scheduler.clone());
    let handler = handlers::Handler::new(data.clone());

    // Configure the Poise framework
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            command_check: Some(|ctx| Box::pin(commands::bot_ban_check(ctx))),
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                    if let Err(e) = poise::builtins::on_error(error).await {
                        warn!("Could not report error to the user: {e}");
                    }
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console("Registering commands".to_string());
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(data)
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::ClientBuilder::new(&token, intents)
        .event_handler(handler)
        .framework(framework)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shard_manager.shutdown_all().await;
        }
    });

    info!("Starting bot...");
    let result = client.start().await;
    scheduler.shutdown();
    if let Err(err) = result {
        error!("Client stopped with error: {err}");
        return Err(err.into());
    }

    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: could not start runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
