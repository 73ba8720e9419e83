use actix_web::{web, App, HttpServer};
use log::info;

use star_vault::api;
use star_vault::app_state::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    log4rs::init_file("server_log.yaml", Default::default()).unwrap();

    // Provider configuration document; a missing file means an empty one.
    let config_path =
        std::env::var("STAR_VAULT_CONFIG").unwrap_or_else(|_| "provider.json".to_string());
    let config = std::fs::read_to_string(&config_path).unwrap_or_else(|_| {
        info!("No configuration at {}, starting empty", config_path);
        String::from("{}")
    });

    let state = AppState::from_config("local://star-vault", &config)
        .expect("Failed to initialize provider");
    let state = web::Data::new(state);

    let listen =
        std::env::var("STAR_VAULT_LISTEN").unwrap_or_else(|_| "0.0.0.0:9710".to_string());
    info!("Starting server on {}", listen);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(actix_web::middleware::Logger::default())
            .service(api::add_target)
            .service(api::remove_target)
            .service(api::destroy_target)
            .service(api::add_transfer_manager)
            .service(api::migrate_target)
            .service(api::get_provider_config)
            .service(api::check_target)
            .service(api::create_region)
            .service(api::write_region)
            .service(api::read_region)
            .service(api::persist_region)
            .service(api::erase_region)
    })
    .bind(listen)?
    .run()
    .await
}
