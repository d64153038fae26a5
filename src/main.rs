//! MeltyFi command line
//!
//! Generates configuration, runs lottery lifecycles against the in-memory
//! engine and verifies published draw proofs.

use meltyfi::{
    config::{generate_sample_config, ConfigLoader, LogLevel, MeltyConfig},
    Address, Amount, CollateralRef, InMemoryCollateral, LotteryEngine, LotteryId, ManualClock, NewLottery,
    RandomnessWorker, VrfProof, VrfRandomnessProvider,
};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// MeltyFi CLI
#[derive(Parser)]
#[command(name = "meltyfi")]
#[command(about = "NFT-collateralized lending through lotteries")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration file with defaults
    GenerateConfig {
        /// Output path
        #[arg(default_value = "meltyfi.toml")]
        output: String,
    },

    /// Run lottery lifecycles end to end against the in-memory engine
    Simulate {
        /// Tickets per lottery
        #[arg(short, long, default_value = "20")]
        supply: u64,

        /// Price of one ticket
        #[arg(short = 'p', long, default_value = "1000")]
        ticket_price: u64,

        /// Skip the repayment scenario
        #[arg(long)]
        no_repay: bool,

        /// Write a snapshot of the final state here
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Print every recorded event as JSON
        #[arg(long)]
        print_events: bool,
    },

    /// Verify a published draw proof
    VerifyDraw {
        /// Hex-encoded output
        #[arg(long)]
        output: String,

        /// Hex-encoded signature
        #[arg(long)]
        proof: String,

        /// Hex-encoded public key
        #[arg(long)]
        public_key: String,

        /// Message the draw was signed over
        #[arg(long)]
        input: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::GenerateConfig { output } => {
            generate_sample_config(&output)?;
            println!("Configuration written to {}", output);
        }

        Commands::Simulate {
            supply,
            ticket_price,
            no_repay,
            snapshot,
            print_events,
        } => {
            let config = load_config(cli.config.as_ref(), MeltyConfig::simulation())?;
            init_logging(&config, cli.verbose, cli.json_logs);
            run_simulation(&config, supply, ticket_price as Amount, !no_repay, snapshot, print_events).await?;
        }

        Commands::VerifyDraw {
            output,
            proof,
            public_key,
            input,
        } => {
            init_logging(&MeltyConfig::default(), cli.verbose, cli.json_logs);
            let bundle = VrfProof {
                output,
                proof,
                public_key,
                input_message: input.clone(),
            };
            if VrfRandomnessProvider::verify(&bundle, &input)? {
                let value = bundle.value()?;
                println!("valid: random value {}", value);
            } else {
                println!("INVALID: proof does not match input");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>, fallback: MeltyConfig) -> Result<MeltyConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(ConfigLoader::new().with_path(path).load()?),
        None => Ok(fallback),
    }
}

fn init_logging(config: &MeltyConfig, verbose: bool, json: bool) {
    let level = if verbose {
        LogLevel::Debug
    } else {
        config.monitoring.log_level
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("meltyfi={}", level.as_filter())));

    if json || config.monitoring.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Distinct demo address for the `index`th buyer
fn buyer(index: u64) -> Address {
    let mut bytes = [0xb0u8; 20];
    bytes[12..].copy_from_slice(&(index + 1).to_be_bytes());
    Address::new(bytes)
}

/// Sell tickets to fresh buyers, each up to the holder cap, until `target` are sold
fn sell(engine: &LotteryEngine, lottery_id: LotteryId, target: u64) -> Result<Vec<Address>, Box<dyn std::error::Error>> {
    let lottery = engine.get_lottery(lottery_id)?;
    let mut buyers = Vec::new();
    let mut sold = lottery.sold;

    while sold < target {
        let holder = buyer(lottery_id * 1_000 + buyers.len() as u64);
        let amount = lottery.holder_cap.min(target - sold);
        engine.buy_tickets(lottery_id, holder, amount, lottery.ticket_price * amount as Amount)?;
        buyers.push(holder);
        sold += amount;
    }
    Ok(buyers)
}

async fn run_simulation(
    config: &MeltyConfig,
    supply: u64,
    ticket_price: Amount,
    repay: bool,
    snapshot: Option<PathBuf>,
    print_events: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = chrono::Utc::now().timestamp().max(0) as u64;
    let clock = Arc::new(ManualClock::new(start));
    let custody = Arc::new(InMemoryCollateral::new());
    let (builder, oracle) = config.engine_builder(clock.clone())?;
    let engine = Arc::new(builder.custody(custody.clone()).build()?);
    if oracle.is_some() {
        info!("Oracle rate source configured; using its initial price");
    }

    let worker = RandomnessWorker::spawn(
        engine.clone(),
        config.randomness.poll_interval(),
        config.randomness.stall_alert(),
    );

    let owner = Address::repeat_byte(0x0a);
    let nft_contract = Address::repeat_byte(0xc0);
    let open = |token_id: u128, name: &str| {
        let collateral = CollateralRef::new(nft_contract, token_id);
        custody.mint(collateral, owner);
        engine.create_lottery(NewLottery {
            owner,
            collateral,
            ticket_price,
            max_supply: supply,
            duration_days: 7,
            display_name: name.to_string(),
            display_image: format!("ipfs://meltyfi/{}", token_id),
        })
    };

    // sold out: winner takes the NFT, everyone else melts for ChocoChips
    let drawn = open(1, "Sold out")?;
    let buyers = sell(&engine, drawn, supply)?;
    let result = engine.wait_for_draw(drawn, Duration::from_secs(5)).await?;
    info!(lottery_id = drawn, winner = %result.winner, ticket = result.winning_ticket, "Draw complete");

    engine.claim_collateral(drawn, result.winner)?;
    for holder in buyers.iter().filter(|holder| **holder != result.winner) {
        engine.melt_tickets(drawn, *holder)?;
    }

    // repaid: the owner buys the NFT back and holders melt for refunds
    if repay {
        let repaid = open(2, "Repaid")?;
        let buyers = sell(&engine, repaid, supply / 2)?;
        let owed = engine.get_lottery(repaid)?.total_raised;
        engine.repay(repaid, owner, owed)?;
        for holder in buyers {
            let outcome = engine.melt_tickets(repaid, holder)?;
            info!(lottery_id = repaid, %holder, refund = outcome.refund, "Refund melted");
        }
    }

    // expired: nobody bought, the NFT goes back to its owner
    let expired = open(3, "Expired")?;
    clock.advance(8 * meltyfi::common::types::SECONDS_PER_DAY);
    engine.settle(expired)?;

    match engine.verify_draw(drawn)? {
        Some(true) => info!(lottery_id = drawn, "Draw proof verified"),
        Some(false) => warn!(lottery_id = drawn, "Draw proof did not verify"),
        None => warn!(lottery_id = drawn, "Draw has no proof; provider is not verifiable"),
    }

    engine.withdraw(owner);
    worker.stop();

    if print_events {
        for event in engine.events_since(0, usize::MAX) {
            println!("{}", serde_json::to_string(&event)?);
        }
    }
    println!("{}", serde_json::to_string_pretty(&engine.protocol_stats())?);

    if let Some(path) = snapshot {
        meltyfi::save_snapshot(&path, &engine.snapshot())?;
        println!("Snapshot written to {}", path.display());
    }

    Ok(())
}
