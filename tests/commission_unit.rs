use sapi_settlement::commission::{split, CommissionError, PROCESSING_FEE_PERCENT};

#[test]
fn commission_on_creator_keeps_gross_equal_to_nominal() {
    // 50 000 сум = 5 000 000 тийин, доля платформы 20%
    let s = split(5_000_000, 20, false).expect("split");

    assert_eq!(s.gross_amount, 5_000_000);
    assert_eq!(s.platform_amount, 1_000_000);
    assert_eq!(s.processing_fee, 100_000);
    assert_eq!(s.creator_amount, 3_900_000);

    // инвариант сплита: creator + platform == gross - fee
    assert_eq!(
        s.creator_amount + s.platform_amount,
        s.gross_amount - s.processing_fee
    );
    // леджер сводится строго: creator + (platform + fee) == gross
    assert_eq!(s.creator_amount + s.ledger_platform_amount(), s.gross_amount);
}

#[test]
fn commission_on_subscriber_charges_on_top() {
    let s = split(5_000_000, 20, true).expect("split");

    assert_eq!(s.creator_amount, 5_000_000);
    assert_eq!(s.platform_amount, 1_000_000);
    assert_eq!(s.processing_fee, 100_000);
    assert_eq!(
        s.gross_amount,
        5_000_000 + s.platform_amount + s.processing_fee
    );
    assert_eq!(s.creator_amount + s.ledger_platform_amount(), s.gross_amount);
}

#[test]
fn truncating_division_remainder_goes_to_platform_column() {
    // 333 тийина не делятся нацело ни на 2%, ни на 13%
    let s = split(333, 13, false).expect("split");

    assert_eq!(s.processing_fee, 333 * PROCESSING_FEE_PERCENT / 100); // 6
    assert_eq!(s.platform_amount, 43);
    assert_eq!(s.creator_amount, 333 - 43 - 6);
    // после усечения сумма всё равно обязана сойтись с gross
    assert_eq!(s.creator_amount + s.ledger_platform_amount(), s.gross_amount);
}

#[test]
fn creator_amount_is_never_negative() {
    // 99% + 2% процессинга загоняют долю создателя в минус
    let err = split(100, 99, false).unwrap_err();
    assert!(matches!(err, CommissionError::CreatorShareNegative { .. }));

    // а при комиссии на подписчике тот же тариф валиден
    let s = split(100, 99, true).expect("split");
    assert_eq!(s.creator_amount, 100);
}

#[test]
fn zero_share_still_charges_processing_fee() {
    let s = split(10_000, 0, false).expect("split");
    assert_eq!(s.platform_amount, 0);
    assert_eq!(s.processing_fee, 200);
    assert_eq!(s.creator_amount, 9_800);
}

#[test]
fn invalid_inputs_are_rejected() {
    assert!(matches!(
        split(0, 20, false),
        Err(CommissionError::InvalidAmount(0))
    ));
    assert!(matches!(
        split(-5, 20, true),
        Err(CommissionError::InvalidAmount(-5))
    ));
    assert!(matches!(
        split(100, 101, false),
        Err(CommissionError::InvalidSharePercent(101))
    ));
    assert!(matches!(
        split(100, -1, false),
        Err(CommissionError::InvalidSharePercent(-1))
    ));
}
