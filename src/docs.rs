use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::cards::add_card,
        crate::api::subscriptions::subscribe,
        crate::api::donations::donate,
        crate::api::webhooks_multibank::bind_card_webhook,
        crate::api::webhooks_multibank::payment_webhook
    ),
    components(
        schemas(
            crate::api::cards::AddCardResponse,
            crate::api::subscriptions::SubscribeRequest,
            crate::api::donations::DonateRequest,
            crate::api::webhooks_multibank::BindCardCallback,
            crate::orchestrator::ChargeOutcome
        )
    ),
    tags(
        (name = "cards", description = "Card enrollment"),
        (name = "billing", description = "Subscriptions and donations"),
        (name = "webhooks", description = "Callbacks from Multibank")
    )
)]
pub struct ApiDoc;
