// src/commission.rs
//
// Расчёт сплита: доля создателя / доля платформы / комиссия процессинга.
// Все суммы — целые тийины, деление усекающее. Кто платит комиссию,
// определяет commission_by_subscriber.

use thiserror::Error;

/// Фиксированная комиссия процессинга провайдера, процент от номинала.
pub const PROCESSING_FEE_PERCENT: i64 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommissionError {
    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),
    #[error("sapi share percent out of range: {0}")]
    InvalidSharePercent(i64),
    /// Доля создателя ушла в минус — ошибка конфигурации тарифа,
    /// не ретраится.
    #[error("creator share negative: amount={amount} share={share_percent}%")]
    CreatorShareNegative { amount: i64, share_percent: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitAmounts {
    /// Что получает создатель.
    pub creator_amount: i64,
    /// Доля платформы без комиссии процессинга.
    pub platform_amount: i64,
    pub processing_fee: i64,
    /// Что списывается с карты.
    pub gross_amount: i64,
}

impl SplitAmounts {
    /// Колонка platform_amount в леджере: доля платформы плюс комиссия
    /// процессинга и остаток округления, чтобы
    /// creator_amount + platform_amount == amount сходилось строго.
    pub fn ledger_platform_amount(&self) -> i64 {
        self.platform_amount + self.processing_fee
    }
}

/// `amount` уже в минорных единицах — конвертацию ×100 из цены тарифа
/// делает оркестратор.
pub fn split(
    amount: i64,
    sapi_share_percent: i64,
    commission_by_subscriber: bool,
) -> Result<SplitAmounts, CommissionError> {
    if amount <= 0 {
        return Err(CommissionError::InvalidAmount(amount));
    }
    if !(0..=100).contains(&sapi_share_percent) {
        return Err(CommissionError::InvalidSharePercent(sapi_share_percent));
    }

    let processing_fee = amount * PROCESSING_FEE_PERCENT / 100;
    let platform_amount = amount * sapi_share_percent / 100;

    if commission_by_subscriber {
        // Создатель получает полный номинал, подписчик платит сверху.
        Ok(SplitAmounts {
            creator_amount: amount,
            platform_amount,
            processing_fee,
            gross_amount: amount + platform_amount + processing_fee,
        })
    } else {
        let creator_amount = amount - platform_amount - processing_fee;
        if creator_amount < 0 {
            return Err(CommissionError::CreatorShareNegative {
                amount,
                share_percent: sapi_share_percent,
            });
        }
        Ok(SplitAmounts {
            creator_amount,
            platform_amount,
            processing_fee,
            gross_amount: amount,
        })
    }
}
