//! Exchange core simulation.
//!
//! Walks the engine through a spot trade, a perpetual market from launch to
//! liquidation, a binary options settlement and a burn auction round.

use exchange_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn main() -> Result<(), EngineError> {
    tracing_subscriber::fmt::init();

    println!("Exchange Core Engine Simulation");
    println!("Spot, Perpetual and Binary Options Markets, One Ledger\n");

    scenario_1_spot_trading()?;
    scenario_2_perpetual_batch_and_funding()?;
    scenario_3_liquidation()?;
    scenario_4_binary_settlement()?;
    scenario_5_burn_auction()?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

fn usdt() -> Denom {
    Denom::from("usdt")
}

fn new_engine(oracle: StaticOracle) -> Result<Engine, EngineError> {
    let mut engine = Engine::new(EngineConfig::for_tests(), oracle)?;
    engine.begin_block(BlockInfo {
        height: 1,
        time: Timestamp::from_secs(1_700_000_000),
    })?;
    Ok(engine)
}

fn next_block(engine: &mut Engine, secs: i64) -> Result<BlockReport, EngineError> {
    let block = engine.block();
    engine.begin_block(BlockInfo {
        height: block.height + 1,
        time: block.time.plus_secs(secs),
    })?;
    engine.end_block()
}

fn perp_launch() -> DerivativeMarketLaunch {
    DerivativeMarketLaunch {
        ticker: "INJ/USDT PERP".to_string(),
        quote_denom: usdt(),
        oracle: OracleParams::new("INJ", "USDT"),
        min_price_tick_size: dec!(0.01),
        min_quantity_tick_size: dec!(0.001),
        initial_margin_ratio: None,
        maintenance_margin_ratio: None,
        maker_fee_rate: None,
        taker_fee_rate: None,
    }
}

fn launch_perp(engine: &mut Engine, creator: SubaccountId) -> Result<MarketId, EngineError> {
    let launch = perp_launch();
    engine.create_insurance_fund(NewInsuranceFund {
        creator,
        ticker: launch.ticker.clone(),
        quote_denom: launch.quote_denom.clone(),
        oracle: launch.oracle.clone(),
        market_type: MarketType::Perpetual,
        expiry: None,
        initial_deposit: dec!(10000),
    })?;
    match engine.submit_proposal(Proposal::PerpetualMarketLaunch(launch))? {
        ProposalOutcome::MarketLaunched(id) => Ok(id),
        other => Err(EngineError::UnsupportedOrder(format!("unexpected outcome {other:?}"))),
    }
}

/// Immediate matching on a spot pair.
fn scenario_1_spot_trading() -> Result<(), EngineError> {
    println!("Scenario 1: Spot Order Matching\n");

    let mut engine = new_engine(StaticOracle::new())?;
    let outcome = engine.submit_proposal(Proposal::SpotMarketLaunch(SpotMarketLaunch {
        ticker: "INJ/USDT".to_string(),
        base_denom: Denom::from("inj"),
        quote_denom: usdt(),
        min_price_tick_size: dec!(0.001),
        min_quantity_tick_size: dec!(0.001),
        maker_fee_rate: None,
        taker_fee_rate: None,
    }))?;
    let ProposalOutcome::MarketLaunched(market) = outcome else {
        return Ok(());
    };

    let (alice, bob) = (SubaccountId(1), SubaccountId(2));
    engine.deposit(alice, &usdt(), dec!(10000))?;
    engine.deposit(bob, &Denom::from("inj"), dec!(100))?;

    engine.place_order(OrderRequest::limit(market, bob, Side::Sell, dec!(25), dec!(40)))?;
    println!("  Bob offers 40 INJ @ $25");

    let result = engine.place_order(OrderRequest::market(market, alice, Side::Buy, dec!(26), dec!(30)))?;
    println!(
        "  Alice buys {} INJ @ ${}",
        result.filled_quantity,
        result.average_price.unwrap_or_default()
    );
    println!(
        "  Alice holds {} INJ, Bob holds {} USDT",
        engine.deposit_of(alice, &Denom::from("inj")).total,
        engine.deposit_of(bob, &usdt()).total
    );
    println!("  Exchange fee pool: {} USDT\n", engine.fee_pool(&usdt()));
    Ok(())
}

/// Derivative limit orders cross in the end-block batch at the maker's price.
fn scenario_2_perpetual_batch_and_funding() -> Result<(), EngineError> {
    println!("Scenario 2: Perpetual Batch Auction and Funding\n");

    let mut engine = new_engine(StaticOracle::new().with_price("INJ", "USDT", dec!(2000)))?;
    let (creator, alice, bob) = (SubaccountId(9), SubaccountId(1), SubaccountId(2));
    for who in [creator, alice, bob] {
        engine.deposit(who, &usdt(), dec!(50000))?;
    }
    let market = launch_perp(&mut engine, creator)?;

    engine.place_order(OrderRequest::limit(market, alice, Side::Buy, dec!(2010), dec!(1)).with_margin(dec!(2110.5)))?;
    engine.place_order(OrderRequest::limit(market, bob, Side::Sell, dec!(2005), dec!(1)))?;
    let report = engine.end_block()?;
    println!("  Batch produced {} fill(s)", report.fills.len());

    for (name, who) in [("Alice", alice), ("Bob", bob)] {
        if let Some(p) = engine.position(market, who) {
            let side = if p.is_long { "long" } else { "short" };
            println!("  {name}: {side} {} @ ${}, margin ${}", p.quantity, p.entry_price, p.margin);
        }
    }

    engine.oracle_mut().set_price("INJ", "USDT", dec!(1990));
    for _ in 0..4 {
        next_block(&mut engine, 900)?;
    }
    let cumulative = engine.market(market).map(|m| m.cumulative_funding()).unwrap_or_default();
    println!("  Cumulative funding after an hour: {cumulative}\n");
    Ok(())
}

/// Forced close of an underwater long against resting bids.
fn scenario_3_liquidation() -> Result<(), EngineError> {
    println!("Scenario 3: Liquidation\n");

    let mut engine = new_engine(StaticOracle::new().with_price("INJ", "USDT", dec!(2000)))?;
    let (creator, trader, maker, keeper) = (SubaccountId(9), SubaccountId(1), SubaccountId(2), SubaccountId(3));
    for who in [creator, trader, maker] {
        engine.deposit(who, &usdt(), dec!(50000))?;
    }
    let market = launch_perp(&mut engine, creator)?;

    engine.place_order(OrderRequest::limit(market, maker, Side::Sell, dec!(2000), dec!(1)))?;
    engine.place_order(OrderRequest::market(market, trader, Side::Buy, dec!(2000), dec!(1)))?;
    let position = engine.position(market, trader).cloned();
    if let Some(p) = &position {
        println!("  Trader long {} @ ${} with ${} margin", p.quantity, p.entry_price, p.margin);
    }

    engine.oracle_mut().set_price("INJ", "USDT", dec!(1900));
    engine.place_order(OrderRequest::limit(market, maker, Side::Buy, dec!(1920), dec!(1)))?;
    println!("  Oracle falls to $1,900, maker bids $1,920");

    let result = engine.liquidate_position(market, trader, Some(keeper))?;
    println!(
        "  Liquidated {} @ ${}: payout ${}, keeper reward ${}, insurance {:+}",
        result.quantity, result.average_price, result.payout, result.liquidator_reward, result.insurance_delta
    );
    println!(
        "  Insurance fund now ${}\n",
        engine.insurance_fund(market).map(|f| f.balance).unwrap_or_default()
    );
    Ok(())
}

/// Binary options resolve at the settlement timestamp.
fn scenario_4_binary_settlement() -> Result<(), EngineError> {
    println!("Scenario 4: Binary Options Settlement\n");

    let mut engine = new_engine(StaticOracle::new())?;
    let start = engine.block().time;
    let (yes, no) = (SubaccountId(1), SubaccountId(2));
    engine.deposit(yes, &usdt(), dec!(1000))?;
    engine.deposit(no, &usdt(), dec!(1000))?;

    let oracle = OracleParams::new("ELECTION", "USDT");
    let expiration = start.plus_secs(3600);
    let market = derivative_market_id(MarketType::BinaryOptions, "WINNER", &usdt(), &oracle, Some(expiration));
    engine.oracle_mut().set_market_price(market, dec!(0.5));
    engine.submit_proposal(Proposal::BinaryOptionsMarketLaunch(BinaryOptionsMarketLaunch {
        ticker: "WINNER".to_string(),
        quote_denom: usdt(),
        oracle,
        expiration_timestamp: expiration,
        settlement_timestamp: start.plus_secs(7200),
        settlement_scale: Decimal::ONE,
        min_price_tick_size: dec!(0.01),
        min_quantity_tick_size: dec!(1),
        maker_fee_rate: None,
        taker_fee_rate: None,
    }))?;

    engine.place_order(OrderRequest::limit(market, no, Side::Sell, dec!(0.6), dec!(100)))?;
    engine.place_order(OrderRequest::market(market, yes, Side::Buy, dec!(0.6), dec!(100)))?;
    println!("  YES buys 100 contracts @ $0.60 from NO");

    engine.oracle_mut().set_market_price(market, Decimal::ONE);
    next_block(&mut engine, 3600)?;
    println!("  Market expired: {:?}", engine.market(market).map(|m| m.status));
    let report = next_block(&mut engine, 3600)?;
    for settled in &report.settled_markets {
        println!("  Settled at {:?}, {} positions closed", settled.settlement_price, settled.positions_closed);
    }
    println!(
        "  YES balance ${}, NO balance ${}\n",
        engine.deposit_of(yes, &usdt()).total,
        engine.deposit_of(no, &usdt()).total
    );
    Ok(())
}

/// Pooled fees are auctioned for the bid denom, and the winning bid is burned.
fn scenario_5_burn_auction() -> Result<(), EngineError> {
    println!("Scenario 5: Burn Auction\n");

    let mut engine = new_engine(StaticOracle::new().with_price("INJ", "USDT", dec!(2000)))?;
    let inj = Denom::from("inj");
    let (creator, alice, bob) = (SubaccountId(9), SubaccountId(1), SubaccountId(2));
    for who in [creator, alice, bob] {
        engine.deposit(who, &usdt(), dec!(50000))?;
        engine.deposit(who, &inj, dec!(5000))?;
    }
    let market = launch_perp(&mut engine, creator)?;
    engine.place_order(OrderRequest::limit(market, alice, Side::Sell, dec!(2000), dec!(2)))?;
    engine.place_order(OrderRequest::market(market, bob, Side::Buy, dec!(2000), dec!(2)))?;

    // the first end block opens round 1 with the fees collected so far
    engine.end_block()?;
    let round = engine.ledger().auction.round;
    engine.place_bid(alice, round, dec!(1000))?;
    engine.place_bid(bob, round, dec!(1379))?;
    let rejected = engine.place_bid(alice, round, dec!(1380));
    println!("  Bids 1000 then 1379 accepted; 1380 rejected: {}", rejected.is_err());

    let report = next_block(&mut engine, 3600)?;
    if let Some(auction) = report.auction {
        println!("  Round {} won by {:?}, basket {:?}", auction.round, auction.winner.map(|w| w.bidder), auction.basket);
    }
    println!("  Burned: {} INJ\n", engine.ledger().burned.get(&inj).copied().unwrap_or_default());
    Ok(())
}
