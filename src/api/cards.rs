// src/api/cards.rs
//
// Привязка карт через Multibank: создаём заготовку карты с session_id
// провайдера и отдаём форму 3DS; реквизиты доезжают вебхуком bind-card.

use actix_web::{delete, get, post, web, HttpResponse, Responder};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::{db, AppState};

#[derive(Debug, Serialize, ToSchema)]
pub struct AddCardResponse {
    pub card_id: i32,
    pub form_url: String,
}

#[utoipa::path(
    post,
    path = "/api/cards",
    tag = "cards",
    responses(
        (status = 200, description = "Card enrollment started", body = AddCardResponse),
        (status = 400, description = "Provider rejected the request")
    )
)]
#[post("/cards")]
pub async fn add_card(state: web::Data<AppState>, user_id: web::ReqData<i32>) -> impl Responder {
    let user_id = *user_id;

    let phone = match db::get_user_phone(&state.pool, user_id).await {
        Ok(Some(p)) => p,
        Ok(None) => return HttpResponse::BadRequest().json(json!({"error": "user not found"})),
        Err(e) => {
            log::error!("add_card: select user error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let callback_url = format!(
        "{}/webhook/multibank/bind-card",
        state.settings.callback_base_url
    );
    let bind = match state.multibank.bind_card(&phone, &callback_url).await {
        Ok(r) => r,
        Err(e) => {
            log::error!("add_card: bind card error: {e}");
            return HttpResponse::BadRequest().json(json!({
                "error": "card enrollment failed",
                "details": e.to_string()
            }));
        }
    };

    let card_id = match db::insert_pending_card(&state.pool, user_id, &bind.data.session_id).await {
        Ok(id) => id,
        Err(e) => {
            log::error!("add_card: insert card error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    HttpResponse::Ok().json(AddCardResponse {
        card_id,
        form_url: bind.data.form_url,
    })
}

#[get("/cards")]
pub async fn list_cards(state: web::Data<AppState>, user_id: web::ReqData<i32>) -> impl Responder {
    match db::list_user_cards(&state.pool, *user_id).await {
        Ok(cards) => HttpResponse::Ok().json(cards),
        Err(e) => {
            log::error!("list_cards db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Токен отзываем у провайдера best-effort: локальное удаление важнее.
#[delete("/cards/{id}")]
pub async fn remove_card(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
    path: web::Path<i32>,
) -> impl Responder {
    let card_id = path.into_inner();
    let user_id = *user_id;

    let card = match db::get_card(&state.pool, card_id).await {
        Ok(Some(c)) if c.user_id == user_id => c,
        Ok(_) => return HttpResponse::NotFound().json(json!({"error": "card not found"})),
        Err(e) => {
            log::error!("remove_card: select card error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    if let Some(token) = card.token.as_deref() {
        if let Err(e) = state.multibank.remove_card(token).await {
            log::warn!("remove_card: provider revoke failed for card {card_id}: {e}");
        }
    }

    match db::soft_delete_card(&state.pool, card_id, user_id).await {
        Ok(0) => HttpResponse::NotFound().json(json!({"error": "card not found"})),
        Ok(_) => HttpResponse::Ok().json(json!({"ok": true})),
        Err(e) => {
            log::error!("remove_card: delete error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
