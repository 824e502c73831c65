// src/api/multibank_client.rs
//
// Клиент сплит-эквайринга Multibank. Авторизация заголовком X-Api-Key,
// любой не-2xx — жёсткий отказ текущей попытки (без ретраев на этом слое).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MultibankError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("multibank api error status={status} body={body}")]
    Api { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Clone)]
pub struct MultibankClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
pub struct RecipientRequest<'a> {
    pub pinfl: &'a str,
    pub mfo: &'a str,
    pub account_no: &'a str,
    pub commitent: bool,
}

#[derive(Debug, Deserialize)]
pub struct RecipientData {
    pub uuid: String,
}

#[derive(Debug, Deserialize)]
pub struct RecipientResponse {
    pub data: RecipientData,
}

#[derive(Debug, Serialize)]
pub struct CardRef<'a> {
    pub token: &'a str,
}

/// Одна нога сплита. `receipient` — орфография провайдера, контракт
/// фиксирован на их стороне.
#[derive(Debug, Serialize)]
pub struct SplitEntry<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub receipient: &'a str,
    pub amount: i64,
}

/// Строка фискального чека (ОФД), зеркалит сплит; сумма строк обязана
/// сходиться с gross-суммой платежа.
#[derive(Debug, Serialize)]
pub struct OfdLine {
    pub name: String,
    pub count: i64,
    pub price: i64,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct CreatePaymentRequest<'a> {
    pub card: CardRef<'a>,
    pub amount: i64,
    pub store_id: i64,
    pub invoice_id: String,
    pub split: Vec<SplitEntry<'a>>,
    pub ofd: Vec<OfdLine>,
    pub callback_url: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentData {
    #[serde(alias = "uuid")]
    pub transaction_id: String,
    #[serde(default)]
    pub otp_hash: Option<String>,
    #[serde(default)]
    pub checkout_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentResponse {
    pub data: PaymentData,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmData {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentResponse {
    pub data: ConfirmData,
}

#[derive(Debug, Deserialize)]
pub struct BindCardData {
    pub session_id: String,
    pub form_url: String,
}

#[derive(Debug, Deserialize)]
pub struct BindCardResponse {
    pub data: BindCardData,
}

impl MultibankClient {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> MultibankClient {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("reqwest client");
        MultibankClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, MultibankError> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(MultibankError::Api {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str::<T>(&body)
            .map_err(|e| MultibankError::InvalidResponse(format!("{e}; body={body}")))
    }

    /// Резолв получателя выплаты по ПИНФЛ + МФО + счёту.
    pub async fn get_recipient(
        &self,
        pinfl: &str,
        mfo: &str,
        account_no: &str,
    ) -> Result<RecipientResponse, MultibankError> {
        let resp = self
            .http
            .post(format!("{}/api/v1/recipient", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .json(&RecipientRequest {
                pinfl,
                mfo,
                account_no,
                commitent: true,
            })
            .send()
            .await?;
        Self::parse(resp).await
    }

    /// Создание платежа со сплитом. invoice_id — UUID строки леджера,
    /// по нему провайдер будет матчить вебхук.
    pub async fn create_payment(
        &self,
        req: &CreatePaymentRequest<'_>,
    ) -> Result<CreatePaymentResponse, MultibankError> {
        let resp = self
            .http
            .post(format!("{}/api/v1/payment", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .json(req)
            .send()
            .await?;
        Self::parse(resp).await
    }

    /// Подтверждение платежа без степ-апа. При наличии otp_hash не зовётся —
    /// подтверждение доедет вебхуком после OTP.
    pub async fn confirm_payment(
        &self,
        provider_tx_id: &str,
    ) -> Result<ConfirmPaymentResponse, MultibankError> {
        let resp = self
            .http
            .post(format!(
                "{}/api/v1/payment/{}/confirm",
                self.base_url, provider_tx_id
            ))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?;
        Self::parse(resp).await
    }

    /// Старт привязки карты: провайдер возвращает session_id и форму 3DS.
    pub async fn bind_card(
        &self,
        phone: &str,
        callback_url: &str,
    ) -> Result<BindCardResponse, MultibankError> {
        let resp = self
            .http
            .post(format!("{}/api/v1/card/bind", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .json(&serde_json::json!({
                "phone": phone,
                "callback_url": callback_url,
            }))
            .send()
            .await?;
        Self::parse(resp).await
    }

    pub async fn remove_card(&self, token: &str) -> Result<(), MultibankError> {
        let resp = self
            .http
            .delete(format!("{}/api/v1/card", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .query(&[("token", token)])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MultibankError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
