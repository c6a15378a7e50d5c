use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware::Logger, web};
use dotenv::dotenv;
use std::sync::Arc;

mod ai;
mod config;
mod controllers;
mod http;
mod learning;
mod models;
mod pipeline;
mod session;
mod tools;

use ai::ClientFactory;
use config::Config;
use learning::{LearningEngine, MemoryLearning, NoopLearning};
use models::{BotIdentity, InMemoryBotDirectory};
use pipeline::Orchestrator;
use session::InMemoryContextStore;
use tools::provider::ProviderTransport;
use tools::{HttpProviderTransport, ToolDiscovery, ToolExecutor};

pub struct AppState {
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let port = config.port;

    // The bot directory is an external collaborator; a single-process
    // deployment seeds the in-memory one from the environment.
    let bots = Arc::new(InMemoryBotDirectory::new());
    bots.register(BotIdentity {
        id: config.bot_id.clone(),
        name: config.bot_name.clone(),
        personality: config.bot_personality.clone(),
        overrides: Default::default(),
        tool_providers: config.tool_providers.clone(),
    });
    log::info!(
        "Registered bot '{}' with {} tool providers",
        config.bot_id,
        config.tool_providers.len()
    );

    let transport: Arc<dyn ProviderTransport> = Arc::new(HttpProviderTransport);
    let discovery = Arc::new(ToolDiscovery::new(transport.clone()));
    let executor = Arc::new(ToolExecutor::new(transport, discovery.clone()));
    let contexts = Arc::new(InMemoryContextStore::new());

    // Learning is optional; without it the pipeline talks to a no-op engine
    let learning: Arc<dyn LearningEngine> = match std::env::var("NIMBUS_LEARNING").as_deref() {
        Ok("memory") => {
            log::info!("Learning engine: in-memory");
            Arc::new(MemoryLearning::new())
        }
        _ => Arc::new(NoopLearning),
    };

    let orchestrator = Arc::new(Orchestrator::new(
        bots,
        config.defaults.clone(),
        ClientFactory::Http,
        discovery,
        executor,
        contexts,
        learning,
    ));

    log::info!("Starting Nimbus backend on port {}", port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(AppState {
                config: config.clone(),
                orchestrator: Arc::clone(&orchestrator),
            }))
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::health::config)
            .configure(controllers::chat::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
