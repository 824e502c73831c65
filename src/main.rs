// src/main.rs
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use dotenvy::dotenv;
use sqlx::PgPool;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use sapi_settlement::config::Settings;
use sapi_settlement::{api, docs, scheduler, AppState};

async fn index() -> impl Responder {
    HttpResponse::Ok().body("Settlement service ready!")
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let settings = Settings::from_env();

    let pool = PgPool::connect(&settings.database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let state = AppState::new(pool.clone(), settings.clone());

    // фоновое автопродление; без RABBITMQ_URL сервис живёт только на
    // синхронных платежах и вебхуках
    scheduler::start_resubscribe_worker(
        pool.clone(),
        state.orchestrator.clone(),
        settings.clone(),
    )
    .await;

    let bind_addr = settings.bind_addr.clone();
    let state = web::Data::new(state);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/", web::get().to(index))
            .service(
                SwaggerUi::new("/docs/{_:.*}").url("/api-docs/openapi.json", docs::ApiDoc::openapi()),
            )
            // защищённые роуты: только через JWT платформы
            .service(
                web::scope("/api")
                    .wrap(api::auth::JwtMiddleware)
                    .service(api::cards::add_card)
                    .service(api::cards::list_cards)
                    .service(api::cards::remove_card)
                    .service(api::plans::list_creator_plans)
                    .service(api::subscriptions::subscribe)
                    .service(api::subscriptions::list_subscriptions)
                    .service(api::subscriptions::cancel_subscription)
                    .service(api::donations::donate)
                    .service(api::donations::list_my_donations)
                    .service(api::transactions::list_my_transactions),
            )
            // вебхуки провайдера (подпись проверяется в обработчиках)
            .service(api::webhooks_multibank::bind_card_webhook)
            .service(api::webhooks_multibank::payment_webhook)
    })
    .bind(bind_addr)?
    .run()
    .await
}
