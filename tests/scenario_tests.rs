//! End-to-end scenarios through the public engine API.

use exchange_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const T0: i64 = 1_700_000_000;

fn usdt() -> Denom {
    Denom::from("usdt")
}

fn inj() -> Denom {
    Denom::from("inj")
}

fn engine_at_block_one() -> Engine {
    let oracle = StaticOracle::new().with_price("INJ", "USDT", dec!(2000));
    let mut engine = Engine::new(EngineConfig::for_tests(), oracle).unwrap();
    engine
        .begin_block(BlockInfo {
            height: 1,
            time: Timestamp::from_secs(T0),
        })
        .unwrap();
    engine
}

fn advance(engine: &mut Engine, secs: i64) -> BlockReport {
    let block = engine.block();
    engine
        .begin_block(BlockInfo {
            height: block.height + 1,
            time: block.time.plus_secs(secs),
        })
        .unwrap();
    engine.end_block().unwrap()
}

fn perp_fund(creator: SubaccountId, initial_deposit: Decimal) -> NewInsuranceFund {
    NewInsuranceFund {
        creator,
        ticker: "INJ/USDT PERP".to_string(),
        quote_denom: usdt(),
        oracle: OracleParams::new("INJ", "USDT"),
        market_type: MarketType::Perpetual,
        expiry: None,
        initial_deposit,
    }
}

/// Fund and launch the INJ/USDT perpetual with 5% initial and 2% maintenance margin.
fn launch_perp(engine: &mut Engine) -> MarketId {
    let creator = SubaccountId(99);
    engine.deposit(creator, &usdt(), dec!(10000)).unwrap();
    engine.create_insurance_fund(perp_fund(creator, dec!(10000))).unwrap();
    let outcome = engine
        .submit_proposal(Proposal::PerpetualMarketLaunch(DerivativeMarketLaunch {
            ticker: "INJ/USDT PERP".to_string(),
            quote_denom: usdt(),
            oracle: OracleParams::new("INJ", "USDT"),
            min_price_tick_size: dec!(0.01),
            min_quantity_tick_size: dec!(0.001),
            initial_margin_ratio: Some(dec!(0.05)),
            maintenance_margin_ratio: Some(dec!(0.02)),
            maker_fee_rate: None,
            taker_fee_rate: None,
        }))
        .unwrap();
    match outcome {
        ProposalOutcome::MarketLaunched(id) => id,
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn perpetual_buyer_posts_explicit_margin() {
    let mut engine = engine_at_block_one();
    let market = launch_perp(&mut engine);
    let (a, b) = (SubaccountId(1), SubaccountId(2));
    engine.deposit(a, &usdt(), dec!(50000)).unwrap();
    engine.deposit(b, &usdt(), dec!(50000)).unwrap();

    let margin = dec!(2010) * dec!(1.05);
    engine
        .place_order(OrderRequest::limit(market, a, Side::Buy, dec!(2010), dec!(1)).with_margin(margin))
        .unwrap();
    let outcome = engine
        .place_order(OrderRequest::market(market, b, Side::Sell, dec!(2000), dec!(1)))
        .unwrap();
    assert_eq!(outcome.status, OrderStatus::Filled);

    let long = engine.position(market, a).unwrap();
    assert!(long.is_long);
    assert_eq!(long.quantity, dec!(1));
    assert_eq!(long.entry_price, dec!(2010));
    assert_eq!(long.margin, margin);

    let short = engine.position(market, b).unwrap();
    assert!(!short.is_long);
    assert_eq!(short.quantity, dec!(1));
    assert_eq!(short.entry_price, dec!(2010));
}

#[test]
fn margin_below_requirement_is_rejected() {
    let mut engine = engine_at_block_one();
    let market = launch_perp(&mut engine);
    let a = SubaccountId(1);
    engine.deposit(a, &usdt(), dec!(50000)).unwrap();

    // 5% of 2010 is 100.5, and the mark leg asks for 2010 - 1900 = 110
    let result = engine.place_order(OrderRequest::limit(market, a, Side::Buy, dec!(2010), dec!(1)).with_margin(dec!(105)));
    assert!(matches!(result, Err(EngineError::InsufficientMargin { .. })));
    assert_eq!(engine.deposit_of(a, &usdt()).available, dec!(50000));
}

#[test]
fn reduce_only_sell_is_capped_at_position() {
    let mut engine = engine_at_block_one();
    let market = launch_perp(&mut engine);
    let (trader, maker) = (SubaccountId(1), SubaccountId(2));
    engine.deposit(trader, &usdt(), dec!(50000)).unwrap();
    engine.deposit(maker, &usdt(), dec!(50000)).unwrap();

    engine
        .place_order(OrderRequest::limit(market, maker, Side::Sell, dec!(2000), dec!(5)))
        .unwrap();
    engine
        .place_order(OrderRequest::market(market, trader, Side::Buy, dec!(2000), dec!(5)))
        .unwrap();
    assert_eq!(engine.position(market, trader).map(|p| p.quantity), Some(dec!(5)));

    let outcome = engine
        .place_order(OrderRequest::limit(market, trader, Side::Sell, dec!(2100), dec!(10)).reduce_only())
        .unwrap();
    assert_eq!(outcome.quantity, dec!(5));
    assert_eq!(outcome.status, OrderStatus::Resting);
    let resting = engine.order(market, &outcome.order_hash).unwrap();
    assert_eq!(resting.fillable, dec!(5));
    assert_eq!(resting.margin, Decimal::ZERO);

    // the resting reduce-only order already covers the whole position
    let again = engine.place_order(OrderRequest::limit(market, trader, Side::Sell, dec!(2100), dec!(1)).reduce_only());
    assert!(matches!(again, Err(EngineError::ReduceOnlyExceedsPosition { .. })));

    let wrong_side = engine.place_order(OrderRequest::limit(market, trader, Side::Buy, dec!(1900), dec!(1)).reduce_only());
    assert!(matches!(wrong_side, Err(EngineError::ReduceOnlyWithoutPosition(_))));
}

#[test]
fn burn_auction_enforces_increment() {
    let mut engine = engine_at_block_one();
    let (a, b) = (SubaccountId(1), SubaccountId(2));
    engine.deposit(a, &inj(), dec!(5000)).unwrap();
    engine.deposit(b, &inj(), dec!(5000)).unwrap();

    // round 0 closes on the first end block and round 1 opens
    let report = engine.end_block().unwrap();
    assert_eq!(report.auction.map(|r| r.round), Some(0));
    let round = engine.ledger().auction.round;
    assert_eq!(round, 1);

    engine.place_bid(a, round, dec!(1000)).unwrap();
    engine.place_bid(b, round, dec!(1379)).unwrap();
    // 1379 * 1.0025 = 1382.4475
    let low = engine.place_bid(a, round, dec!(1380));
    assert!(matches!(low, Err(EngineError::Auction(AuctionError::BidTooLow { .. }))));

    let wrong_round = engine.place_bid(a, round + 1, dec!(5000));
    assert!(matches!(wrong_round, Err(EngineError::Auction(AuctionError::InvalidRound { .. }))));

    // the outbid bidder is refunded, the leader stays escrowed
    assert_eq!(engine.deposit_of(a, &inj()).total, dec!(5000));
    assert_eq!(engine.deposit_of(b, &inj()).total, dec!(5000) - dec!(1379));

    let report = advance(&mut engine, 3600);
    let closed = report.auction.unwrap();
    assert_eq!(closed.round, 1);
    assert_eq!(closed.winner.map(|w| w.bidder), Some(b));
    assert_eq!(engine.ledger().burned.get(&inj()).copied(), Some(dec!(1379)));
    assert_eq!(engine.ledger().auction.round, 2);
}

#[test]
fn insurance_underwriting_and_redemption() {
    let mut engine = engine_at_block_one();
    let (creator, underwriter) = (SubaccountId(99), SubaccountId(7));
    engine.deposit(creator, &usdt(), dec!(10000)).unwrap();
    engine.deposit(underwriter, &usdt(), dec!(5000)).unwrap();

    let fund_id = engine.create_insurance_fund(perp_fund(creator, dec!(10000))).unwrap();
    let minted = engine.underwrite(underwriter, fund_id, dec!(5000)).unwrap();

    let fund = engine.insurance_fund(fund_id).unwrap();
    assert_eq!(fund.balance, dec!(15000));
    assert_eq!(minted, INITIAL_SUPPLY / Decimal::TWO);
    assert_eq!(fund.shares_of(underwriter), minted);
    assert_eq!(engine.deposit_of(underwriter, &usdt()).total, Decimal::ZERO);

    engine.request_redemption(underwriter, fund_id, minted).unwrap();

    // still inside the notice period
    let report = advance(&mut engine, 30);
    assert_eq!(report.redemptions_paid, Decimal::ZERO);
    assert_eq!(engine.deposit_of(underwriter, &usdt()).total, Decimal::ZERO);

    let report = advance(&mut engine, 30);
    assert_eq!(report.redemptions_paid, dec!(5000));
    assert_eq!(engine.deposit_of(underwriter, &usdt()).total, dec!(5000));
    let fund = engine.insurance_fund(fund_id).unwrap();
    assert_eq!(fund.balance, dec!(10000));
    assert_eq!(fund.shares_of(underwriter), Decimal::ZERO);
}

#[test]
fn redemption_beyond_holdings_is_rejected() {
    let mut engine = engine_at_block_one();
    let creator = SubaccountId(99);
    engine.deposit(creator, &usdt(), dec!(10000)).unwrap();
    let fund_id = engine.create_insurance_fund(perp_fund(creator, dec!(10000))).unwrap();

    let result = engine.request_redemption(SubaccountId(5), fund_id, dec!(1));
    assert!(matches!(result, Err(EngineError::Insurance(_))));
    assert!(engine.insurance_fund(fund_id).unwrap().pending_redemptions.is_empty());
}

#[test]
fn spot_trade_moves_both_denoms() {
    let mut engine = engine_at_block_one();
    let market = engine
        .instant_spot_market_launch(
            SubaccountId(99),
            SpotMarketLaunch {
                ticker: "INJ/USDT".to_string(),
                base_denom: inj(),
                quote_denom: usdt(),
                min_price_tick_size: dec!(0.001),
                min_quantity_tick_size: dec!(0.001),
                maker_fee_rate: Some(Decimal::ZERO),
                taker_fee_rate: Some(Decimal::ZERO),
            },
        )
        .unwrap();
    let (buyer, seller) = (SubaccountId(1), SubaccountId(2));
    engine.deposit(buyer, &usdt(), dec!(1000)).unwrap();
    engine.deposit(seller, &inj(), dec!(100)).unwrap();

    engine
        .place_order(OrderRequest::limit(market, seller, Side::Sell, dec!(25), dec!(10)))
        .unwrap();
    assert_eq!(engine.deposit_of(seller, &inj()).available, dec!(90));

    let outcome = engine
        .place_order(OrderRequest::market(market, buyer, Side::Buy, dec!(25), dec!(4)))
        .unwrap();
    assert_eq!(outcome.filled_quantity, dec!(4));
    assert_eq!(outcome.average_price, Some(dec!(25)));

    assert_eq!(engine.deposit_of(buyer, &inj()).total, dec!(4));
    assert_eq!(engine.deposit_of(buyer, &usdt()).total, dec!(900));
    assert_eq!(engine.deposit_of(seller, &usdt()).total, dec!(100));
    assert_eq!(engine.deposit_of(seller, &inj()).total, dec!(96));
    assert_eq!(engine.deposit_of(seller, &inj()).available, dec!(90));
}

fn launch_spot(engine: &mut Engine, maker_fee_rate: Option<Decimal>, taker_fee_rate: Option<Decimal>) -> MarketId {
    engine
        .instant_spot_market_launch(
            SubaccountId(99),
            SpotMarketLaunch {
                ticker: "INJ/USDT".to_string(),
                base_denom: inj(),
                quote_denom: usdt(),
                min_price_tick_size: dec!(0.001),
                min_quantity_tick_size: dec!(0.001),
                maker_fee_rate,
                taker_fee_rate,
            },
        )
        .unwrap()
}

/// Trader 1 long and trader 2 short 1 @ 2000, then three funding payments of
/// 0.5 * 2000 each leave the long 2900 below zero.
fn underwater_long() -> (Engine, MarketId, SubaccountId) {
    let mut engine = engine_at_block_one();
    let market = launch_perp(&mut engine);
    let (a, b) = (SubaccountId(1), SubaccountId(2));
    engine.deposit(a, &usdt(), dec!(50000)).unwrap();
    engine.deposit(b, &usdt(), dec!(50000)).unwrap();
    engine
        .submit_proposal(Proposal::DerivativeParamUpdate(DerivativeParamUpdate {
            market_id: market,
            update: FeeAndTickUpdate::default(),
            initial_margin_ratio: None,
            maintenance_margin_ratio: None,
            hourly_interest_rate: Some(dec!(0.5)),
            hourly_funding_rate_cap: Some(dec!(0.5)),
            oracle: None,
        }))
        .unwrap();

    engine
        .place_order(OrderRequest::limit(market, b, Side::Sell, dec!(2000), dec!(1)))
        .unwrap();
    engine
        .place_order(OrderRequest::market(market, a, Side::Buy, dec!(2000), dec!(1)))
        .unwrap();
    for _ in 0..3 {
        let report = advance(&mut engine, 3600);
        // no bids rest, the sweep has nothing to close the long against
        assert_eq!(report.skipped_liquidations.len(), 1);
    }
    (engine, market, a)
}

#[test]
fn oversized_order_is_rejected_without_panicking() {
    let mut engine = engine_at_block_one();
    let perp = launch_perp(&mut engine);
    let spot = launch_spot(&mut engine, None, None);
    let a = SubaccountId(1);
    engine.deposit(a, &usdt(), dec!(50000)).unwrap();

    let (price, quantity) = (dec!(100000000000000), dec!(1000000000000000));
    for market in [perp, spot] {
        let result = engine.place_order(OrderRequest::limit(market, a, Side::Buy, price, quantity));
        assert!(matches!(result, Err(EngineError::Overflow(_))), "{result:?}");
        assert!(engine.order_book(market).unwrap().is_empty());
    }
    assert_eq!(engine.deposit_of(a, &usdt()).available, dec!(50000));
}

#[test]
fn top_up_leaving_margin_negative_is_rejected() {
    let (mut engine, market, a) = underwater_long();
    let free = engine.deposit_of(a, &usdt()).available;

    let result = engine.increase_position_margin(a, market, a, dec!(1));
    assert_eq!(
        result,
        Err(EngineError::InsufficientMargin {
            required: dec!(2900),
            provided: dec!(1),
        })
    );
    // funding stays pending and the balance untouched
    assert_eq!(engine.position(market, a).map(|p| p.margin), Some(dec!(100)));
    assert_eq!(engine.deposit_of(a, &usdt()).available, free);

    engine.increase_position_margin(a, market, a, dec!(3000)).unwrap();
    assert_eq!(engine.position(market, a).map(|p| p.margin), Some(dec!(100)));
    assert_eq!(engine.deposit_of(a, &usdt()).available, free - dec!(3000));
}

#[test]
fn funding_settles_into_margin_on_top_up() {
    let mut engine = engine_at_block_one();
    let market = launch_perp(&mut engine);
    let (a, b) = (SubaccountId(1), SubaccountId(2));
    engine.deposit(a, &usdt(), dec!(50000)).unwrap();
    engine.deposit(b, &usdt(), dec!(50000)).unwrap();
    engine
        .place_order(OrderRequest::limit(market, b, Side::Sell, dec!(2000), dec!(1)))
        .unwrap();
    engine
        .place_order(OrderRequest::market(market, a, Side::Buy, dec!(2000), dec!(1)))
        .unwrap();

    let report = advance(&mut engine, 3600);
    assert_eq!(report.funding.len(), 1);
    let payment = &report.funding[0];
    // oracle-priced mark, so only the interest leg is paid
    assert_eq!(payment.rate, FundingParams::default().hourly_interest_rate);
    let index = payment.cumulative_funding;
    assert_eq!(index, payment.rate * dec!(2000));

    engine.increase_position_margin(a, market, a, dec!(10)).unwrap();
    engine.increase_position_margin(b, market, b, dec!(10)).unwrap();
    assert_eq!(engine.position(market, a).map(|p| p.margin), Some(dec!(110) - index));
    assert_eq!(engine.position(market, b).map(|p| p.margin), Some(dec!(110) + index));
}

#[test]
fn post_only_order_that_would_cross_is_rejected() {
    let mut engine = engine_at_block_one();
    let market = launch_perp(&mut engine);
    let (a, b) = (SubaccountId(1), SubaccountId(2));
    engine.deposit(a, &usdt(), dec!(50000)).unwrap();
    engine.deposit(b, &usdt(), dec!(50000)).unwrap();
    engine
        .place_order(OrderRequest::limit(market, b, Side::Sell, dec!(2000), dec!(1)))
        .unwrap();

    let crossing = engine.place_order(OrderRequest::limit(market, a, Side::Buy, dec!(2000), dec!(1)).post_only());
    assert_eq!(
        crossing,
        Err(EngineError::PostOnlyWouldCross {
            market_id: market,
            price: dec!(2000),
        })
    );
    assert_eq!(engine.deposit_of(a, &usdt()).available, dec!(50000));

    let outcome = engine
        .place_order(OrderRequest::limit(market, a, Side::Buy, dec!(1999), dec!(1)).post_only())
        .unwrap();
    assert_eq!(outcome.status, OrderStatus::Resting);
    advance(&mut engine, 1);
    assert!(engine.order(market, &outcome.order_hash).is_some());
}

#[test]
fn equal_price_makers_fill_in_arrival_order() {
    let mut engine = engine_at_block_one();
    let market = launch_spot(&mut engine, Some(Decimal::ZERO), Some(Decimal::ZERO));
    let (first, second, buyer) = (SubaccountId(1), SubaccountId(2), SubaccountId(3));
    engine.deposit(first, &inj(), dec!(10)).unwrap();
    engine.deposit(second, &inj(), dec!(10)).unwrap();
    engine.deposit(buyer, &usdt(), dec!(1000)).unwrap();

    engine
        .place_order(OrderRequest::limit(market, first, Side::Sell, dec!(25), dec!(10)))
        .unwrap();
    let later = engine
        .place_order(OrderRequest::limit(market, second, Side::Sell, dec!(25), dec!(10)))
        .unwrap();

    let outcome = engine
        .place_order(OrderRequest::market(market, buyer, Side::Buy, dec!(25), dec!(12)))
        .unwrap();
    let makers: Vec<(SubaccountId, Decimal)> = outcome.fills.iter().map(|f| (f.maker_subaccount, f.quantity)).collect();
    assert_eq!(makers, vec![(first, dec!(10)), (second, dec!(2))]);
    assert_eq!(engine.order(market, &later.order_hash).map(|o| o.fillable), Some(dec!(8)));
}

#[test]
fn maker_that_cannot_pay_is_cancelled() {
    let mut engine = engine_at_block_one();
    let market = launch_spot(&mut engine, Some(Decimal::ZERO), Some(Decimal::ZERO));
    let (maker, seller) = (SubaccountId(1), SubaccountId(2));
    engine.deposit(maker, &usdt(), dec!(250)).unwrap();
    engine.deposit(seller, &inj(), dec!(10)).unwrap();

    // escrowed at zero fees, so nothing is reserved for the fee raised below
    let resting = engine
        .place_order(OrderRequest::limit(market, maker, Side::Buy, dec!(25), dec!(10)))
        .unwrap();
    engine
        .submit_proposal(Proposal::SpotParamUpdate(SpotParamUpdate {
            market_id: market,
            update: FeeAndTickUpdate {
                maker_fee_rate: Some(dec!(0.01)),
                taker_fee_rate: Some(dec!(0.01)),
                ..Default::default()
            },
        }))
        .unwrap();

    let outcome = engine
        .place_order(OrderRequest::market(market, seller, Side::Sell, dec!(25), dec!(10)))
        .unwrap();
    assert_eq!(outcome.status, OrderStatus::PartiallyFilled);
    assert_eq!(outcome.filled_quantity, Decimal::ZERO);
    assert!(outcome.fills.is_empty());

    assert!(engine.order(market, &resting.order_hash).is_none());
    let cancelled = engine.events().any(|event| {
        matches!(
            &event.payload,
            EventPayload::OrderCancelled(OrderCancelledEvent {
                order_hash,
                reason: CancelReason::FillFailed,
                ..
            }) if *order_hash == resting.order_hash
        )
    });
    assert!(cancelled);
    assert_eq!(engine.deposit_of(maker, &usdt()).available, dec!(250));
    assert_eq!(engine.deposit_of(seller, &inj()).available, dec!(10));
    assert_eq!(engine.deposit_of(seller, &usdt()).total, Decimal::ZERO);
}

#[test]
fn withdraw_takes_only_free_balance() {
    let mut engine = engine_at_block_one();
    let market = launch_spot(&mut engine, Some(Decimal::ZERO), Some(Decimal::ZERO));
    let a = SubaccountId(1);
    engine.deposit(a, &usdt(), dec!(1000)).unwrap();

    engine.withdraw(a, &usdt(), dec!(400)).unwrap();
    assert_eq!(engine.deposit_of(a, &usdt()).total, dec!(600));

    let too_much = engine.withdraw(a, &usdt(), dec!(700));
    assert!(matches!(too_much, Err(EngineError::Account(AccountError::InsufficientBalance { .. }))));
    let zero = engine.withdraw(a, &usdt(), Decimal::ZERO);
    assert!(matches!(zero, Err(EngineError::Account(AccountError::InvalidAmount(_)))));

    // 500 sits in the resting buy
    engine
        .place_order(OrderRequest::limit(market, a, Side::Buy, dec!(25), dec!(20)))
        .unwrap();
    assert!(engine.withdraw(a, &usdt(), dec!(101)).is_err());
    engine.withdraw(a, &usdt(), dec!(100)).unwrap();
    let deposit = engine.deposit_of(a, &usdt());
    assert_eq!(deposit.available, Decimal::ZERO);
    assert_eq!(deposit.total, dec!(500));
}

#[test]
fn fee_discount_applies_once_volume_reaches_the_tier() {
    let mut engine = engine_at_block_one();
    let market = launch_spot(&mut engine, None, None);
    let (seller, buyer) = (SubaccountId(1), SubaccountId(2));
    engine.deposit(seller, &inj(), dec!(100)).unwrap();
    engine.deposit(buyer, &usdt(), dec!(1000)).unwrap();

    let outcome = engine
        .submit_proposal(Proposal::FeeDiscount(FeeDiscountSchedule {
            quote_denoms: vec![usdt()],
            tiers: vec![
                FeeDiscountTier {
                    min_volume: Decimal::ZERO,
                    maker_discount_rate: Decimal::ZERO,
                    taker_discount_rate: Decimal::ZERO,
                },
                FeeDiscountTier {
                    min_volume: dec!(100),
                    maker_discount_rate: dec!(0.2),
                    taker_discount_rate: dec!(0.5),
                },
            ],
        }))
        .unwrap();
    assert_eq!(outcome, ProposalOutcome::FeeDiscountScheduleSet);

    engine
        .place_order(OrderRequest::limit(market, seller, Side::Sell, dec!(25), dec!(10)))
        .unwrap();
    let first = engine
        .place_order(OrderRequest::market(market, buyer, Side::Buy, dec!(25), dec!(4)))
        .unwrap();
    // 100 notional at 0.1% maker and 0.2% taker, no volume yet
    assert_eq!(first.fills[0].maker_fee, dec!(0.1));
    assert_eq!(first.fills[0].taker_fee, dec!(0.2));

    let second = engine
        .place_order(OrderRequest::market(market, buyer, Side::Buy, dec!(25), dec!(4)))
        .unwrap();
    assert_eq!(second.fills[0].maker_fee, dec!(0.08));
    assert_eq!(second.fills[0].taker_fee, dec!(0.1));
    assert_eq!(engine.deposit_of(buyer, &usdt()).total, dec!(1000) - dec!(200) - dec!(0.3));
}

#[test]
fn reward_campaign_accrues_boosted_points_while_running() {
    let mut engine = engine_at_block_one();
    let market = launch_spot(&mut engine, None, None);
    let (seller, buyer) = (SubaccountId(1), SubaccountId(2));
    engine.deposit(seller, &inj(), dec!(100)).unwrap();
    engine.deposit(buyer, &usdt(), dec!(1000)).unwrap();

    let outcome = engine
        .submit_proposal(Proposal::TradingRewardCampaign(TradingRewardCampaign {
            quote_denoms: vec![usdt()],
            boosted_markets: [(market, dec!(2))].into_iter().collect(),
            start: engine.block().time,
            duration: 3600,
        }))
        .unwrap();
    assert_eq!(outcome, ProposalOutcome::TradingRewardCampaignSet);

    engine
        .place_order(OrderRequest::limit(market, seller, Side::Sell, dec!(25), dec!(10)))
        .unwrap();
    engine
        .place_order(OrderRequest::market(market, buyer, Side::Buy, dec!(25), dec!(4)))
        .unwrap();
    let points = |engine: &Engine, who: SubaccountId| engine.ledger().stats.get(&who).map(|s| s.reward_points);
    // fees of 0.2 and 0.1, doubled
    assert_eq!(points(&engine, buyer), Some(dec!(0.4)));
    assert_eq!(points(&engine, seller), Some(dec!(0.2)));

    // the campaign has ended
    advance(&mut engine, 3600);
    engine
        .place_order(OrderRequest::market(market, buyer, Side::Buy, dec!(25), dec!(4)))
        .unwrap();
    assert_eq!(points(&engine, buyer), Some(dec!(0.4)));
    assert_eq!(engine.ledger().stats.get(&buyer).map(|s| s.volume), Some(dec!(200)));
}

#[test]
fn expiry_futures_settle_at_oracle_on_expiry() {
    let mut engine = engine_at_block_one();
    let (creator, a, b) = (SubaccountId(99), SubaccountId(1), SubaccountId(2));
    let expiry = Timestamp::from_secs(T0 + 3600);
    engine.deposit(creator, &usdt(), dec!(10000)).unwrap();
    engine.deposit(a, &usdt(), dec!(50000)).unwrap();
    engine.deposit(b, &usdt(), dec!(50000)).unwrap();

    let launch = DerivativeMarketLaunch {
        ticker: "INJ/USDT 24-DEC".to_string(),
        quote_denom: usdt(),
        oracle: OracleParams::new("INJ", "USDT"),
        min_price_tick_size: dec!(0.01),
        min_quantity_tick_size: dec!(0.001),
        initial_margin_ratio: None,
        maintenance_margin_ratio: None,
        maker_fee_rate: Some(Decimal::ZERO),
        taker_fee_rate: Some(Decimal::ZERO),
    };
    engine
        .create_insurance_fund(NewInsuranceFund {
            creator,
            ticker: launch.ticker.clone(),
            quote_denom: usdt(),
            oracle: launch.oracle.clone(),
            market_type: MarketType::ExpiryFutures,
            expiry: Some(expiry),
            initial_deposit: dec!(10000),
        })
        .unwrap();
    let market = match engine
        .submit_proposal(Proposal::ExpiryFuturesMarketLaunch(ExpiryFuturesMarketLaunch { market: launch, expiry }))
        .unwrap()
    {
        ProposalOutcome::MarketLaunched(id) => id,
        other => panic!("unexpected outcome {other:?}"),
    };

    engine
        .place_order(OrderRequest::limit(market, b, Side::Sell, dec!(2000), dec!(1)))
        .unwrap();
    engine
        .place_order(OrderRequest::market(market, a, Side::Buy, dec!(2000), dec!(1)))
        .unwrap();

    engine.oracle_mut().set_price("INJ", "USDT", dec!(2050));
    let report = advance(&mut engine, 3600);
    assert_eq!(report.settled_markets.len(), 1);
    let settled = &report.settled_markets[0];
    assert_eq!(settled.settlement_price, Some(dec!(2050)));
    assert_eq!(settled.status, MarketStatus::Expired);
    assert_eq!(settled.positions_closed, 2);

    assert_eq!(engine.market(market).map(|m| m.status), Some(MarketStatus::Expired));
    assert!(engine.ledger().positions_in(market).is_empty());
    assert_eq!(engine.deposit_of(a, &usdt()).total, dec!(50050));
    assert_eq!(engine.deposit_of(b, &usdt()).total, dec!(49950));
}

/// Binary market on FED/USD with zero fees, expiring an hour in and settling
/// an hour later. Trader 1 holds 10 long @ 0.6 against trader 2.
fn binary_market_with_position(engine: &mut Engine) -> MarketId {
    engine.oracle_mut().set_price("FED", "USD", dec!(0.5));
    let outcome = engine
        .submit_proposal(Proposal::BinaryOptionsMarketLaunch(BinaryOptionsMarketLaunch {
            ticker: "FED CUT DEC".to_string(),
            quote_denom: usdt(),
            oracle: OracleParams::new("FED", "USD"),
            expiration_timestamp: Timestamp::from_secs(T0 + 3600),
            settlement_timestamp: Timestamp::from_secs(T0 + 7200),
            settlement_scale: Decimal::ONE,
            min_price_tick_size: dec!(0.01),
            min_quantity_tick_size: Decimal::ONE,
            maker_fee_rate: Some(Decimal::ZERO),
            taker_fee_rate: Some(Decimal::ZERO),
        }))
        .unwrap();
    let market = match outcome {
        ProposalOutcome::MarketLaunched(id) => id,
        other => panic!("unexpected outcome {other:?}"),
    };

    let (a, b) = (SubaccountId(1), SubaccountId(2));
    engine.deposit(a, &usdt(), dec!(100)).unwrap();
    engine.deposit(b, &usdt(), dec!(100)).unwrap();
    engine
        .place_order(OrderRequest::limit(market, a, Side::Buy, dec!(0.6), dec!(10)))
        .unwrap();
    engine
        .place_order(OrderRequest::market(market, b, Side::Sell, dec!(0.6), dec!(10)))
        .unwrap();
    // the buyer posts 6, the seller the remaining 4 of the payout range
    assert_eq!(engine.deposit_of(a, &usdt()).available, dec!(94));
    assert_eq!(engine.deposit_of(b, &usdt()).available, dec!(96));
    market
}

#[test]
fn binary_options_expire_then_settle_at_oracle() {
    let mut engine = engine_at_block_one();
    let market = binary_market_with_position(&mut engine);
    let (a, b, c) = (SubaccountId(1), SubaccountId(2), SubaccountId(3));
    engine.deposit(c, &usdt(), dec!(100)).unwrap();
    let bid = engine
        .place_order(OrderRequest::limit(market, c, Side::Buy, dec!(0.5), dec!(5)))
        .unwrap();

    // expired: trading stops, positions wait for settlement
    let report = advance(&mut engine, 3600);
    assert!(report.settled_markets.is_empty());
    assert_eq!(engine.market(market).map(|m| m.status), Some(MarketStatus::Expired));
    assert!(engine.order(market, &bid.order_hash).is_none());
    assert_eq!(engine.deposit_of(c, &usdt()).available, dec!(100));
    assert_eq!(engine.ledger().positions_in(market).len(), 2);

    // the event happened; the feed reads above the scale and is clamped
    engine.oracle_mut().set_price("FED", "USD", dec!(1.2));
    let report = advance(&mut engine, 3600);
    assert_eq!(report.settled_markets.len(), 1);
    assert_eq!(report.settled_markets[0].settlement_price, Some(Decimal::ONE));
    assert_eq!(report.settled_markets[0].status, MarketStatus::Demolished);
    assert_eq!(engine.market(market).map(|m| m.status), Some(MarketStatus::Demolished));
    assert_eq!(engine.deposit_of(a, &usdt()).total, dec!(104));
    assert_eq!(engine.deposit_of(b, &usdt()).total, dec!(96));
}

#[test]
fn forced_binary_settlement_without_price_refunds_at_entry() {
    let mut engine = engine_at_block_one();
    let market = binary_market_with_position(&mut engine);

    let outcome = engine
        .submit_proposal(Proposal::ForcedSettlement(ForcedSettlement {
            market_id: market,
            settlement_price: None,
        }))
        .unwrap();
    let result = match outcome {
        ProposalOutcome::MarketSettled(result) => result,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(result.settlement_price, None);
    assert_eq!(result.positions_closed, 2);
    assert_eq!(
        engine.market(market).and_then(|m| m.expiry).and_then(|e| e.settlement_price),
        Some(SettlementPrice::RefundAtEntry)
    );
    for trader in [SubaccountId(1), SubaccountId(2)] {
        let deposit = engine.deposit_of(trader, &usdt());
        assert_eq!(deposit.total, dec!(100));
        assert_eq!(deposit.available, dec!(100));
    }
}
