// Privacy pool withdrawal CLI
// Drives the quote lifecycle, proof orchestration and execution against in-process capabilities

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use privacy_pool_withdraw::{
    chain::WalletClient,
    classifier::{classify_revert, is_user_behaviour, revert_user_message},
    mock::{KeyedAccountService, ListMerkleProver, MockChain, MockProver, MockRelayer, MockWallet},
    proof::AccountService,
    telemetry::{LogNotifier, TracingTelemetry},
    *,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "pool-withdraw")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Fake every transaction instead of touching relayer or chain
    #[arg(long, global = true)]
    test_mode: bool,
    /// Chain to operate on (defaults to the first configured chain)
    #[arg(long, global = true)]
    chain_id: Option<ChainId>,
    /// Pool asset symbol
    #[arg(long, global = true, default_value = "ETH")]
    asset: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Request a fee quote and follow its countdown until it expires
    Quote {
        /// Amount in whole asset units, e.g. 1.5
        #[arg(short, long)]
        amount: String,
        #[arg(short, long)]
        recipient: String,
        #[arg(long)]
        extra_gas: bool,
        /// Quote lifetime granted by the relayer, in seconds
        #[arg(long, default_value = "30")]
        ttl: u64,
    },
    /// Quote, prove and relay a withdrawal
    Withdraw {
        #[arg(short, long)]
        amount: String,
        #[arg(short, long)]
        recipient: String,
        /// Balance of the pool account being spent
        #[arg(long, default_value = "10")]
        balance: String,
    },
    /// Ragequit the pool account's commitment
    Exit {
        #[arg(long, default_value = "1")]
        balance: String,
    },
    /// Classify a raw relayer, contract or wallet error message
    Classify { message: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::with_builtin_chains(true)?,
    };
    if cli.test_mode {
        config.test_mode = true;
    }

    match cli.command {
        Commands::Quote { amount, recipient, extra_gas, ttl } => {
            let session = Session::new(config, cli.chain_id, &cli.asset, Duration::from_secs(ttl))?;
            run_quote(&session, &amount, &recipient, extra_gas).await
        }
        Commands::Withdraw { amount, recipient, balance } => {
            let session = Session::new(config, cli.chain_id, &cli.asset, Duration::from_secs(300))?;
            run_withdraw(&session, &amount, &recipient, &balance).await
        }
        Commands::Exit { balance } => {
            let session = Session::new(config, cli.chain_id, &cli.asset, Duration::from_secs(300))?;
            run_exit(&session, &balance).await
        }
        Commands::Classify { message } => {
            classify(&message);
            Ok(())
        }
    }
}

/// Capabilities and configuration for one CLI invocation
struct Session {
    config: AppConfig,
    pool: PoolInfo,
    relayer_address: Address,
    relayer: Arc<MockRelayer>,
    chain: Arc<MockChain>,
    wallet: Arc<MockWallet>,
    prover: Arc<MockProver>,
    ledger: Arc<MemoryLedger>,
    accounts: Arc<KeyedAccountService>,
}

impl Session {
    fn new(config: AppConfig, chain_id: Option<ChainId>, asset: &str, quote_ttl: Duration) -> Result<Self> {
        let chain_config = match chain_id {
            Some(id) => config.chain(id),
            None => config.chains.first(),
        }
        .ok_or_else(|| anyhow!("no configured chain matches {:?}", chain_id))?;

        let pool = config
            .pool(chain_config.chain_id, asset)
            .cloned()
            .ok_or_else(|| anyhow!("no {} pool on chain {}", asset, chain_config.chain_id))?;
        let relayer_config = chain_config
            .relayers
            .first()
            .ok_or_else(|| anyhow!("no relayer configured for chain {}", chain_config.chain_id))?;

        let relayer_address = Address::from_slice(&hash_data(relayer_config.url.as_bytes())[..20]);
        info!("🛰️  Using relayer {} ({}) on {}", relayer_config.name, relayer_config.url, chain_config.name);

        let scope = FieldElement::from_decimal(&pool.scope)?;
        let owner = Address::from_slice(&hash_data(b"pool-withdraw demo wallet")[..20]);

        Ok(Self {
            relayer: Arc::new(MockRelayer::new(Arc::new(SystemClock)).with_ttl(quote_ttl)),
            chain: Arc::new(MockChain::new(scope)),
            wallet: Arc::new(MockWallet::new(owner)),
            prover: Arc::new(MockProver::new(Duration::from_millis(200))),
            ledger: Arc::new(MemoryLedger::new()),
            accounts: Arc::new(KeyedAccountService::new(hash_to_field(b"pool-withdraw demo seed"))),
            relayer_address,
            config,
            pool,
        })
    }

    fn quote_manager(&self) -> QuoteLifecycleManager {
        QuoteLifecycleManager::new(self.relayer.clone(), Arc::new(LogNotifier))
    }

    fn orchestrator(&self) -> ProofOrchestrator {
        ProofOrchestrator::new(
            self.chain.clone(),
            Arc::new(ListMerkleProver),
            self.prover.clone(),
            Arc::new(TracingTelemetry),
            Arc::new(LogNotifier),
        )
    }

    fn executor(&self) -> WithdrawalExecutor {
        WithdrawalExecutor::new(
            self.relayer.clone(),
            self.chain.clone(),
            self.wallet.clone(),
            self.ledger.clone(),
            Arc::new(TracingTelemetry),
            Arc::new(LogNotifier),
            ExecutionSettings::from(&self.config),
        )
    }

    fn parameters(&self, amount: U256, recipient: &str, extra_gas: bool) -> QuoteParameters {
        QuoteParameters {
            chain_id: Some(self.pool.chain_id),
            amount,
            asset: Some(self.pool.asset_address),
            recipient: recipient.to_string(),
            relayer: Some(self.relayer_address),
            extra_gas,
        }
    }

    /// Pool account holding a single deposit of `balance`
    fn pool_account(&self, balance: U256) -> PoolAccount {
        let label = hash_to_field(format!("{}:{}", self.pool.scope, "demo-deposit").as_bytes());
        PoolAccount {
            balance,
            last_commitment: Some(Commitment {
                hash: hash_to_field(&[label.as_bytes().as_slice(), balance.to_be_bytes::<32>().as_slice()].concat()),
                label,
                value: balance,
            }),
        }
    }
}

async fn run_quote(session: &Session, amount: &str, recipient: &str, extra_gas: bool) -> Result<()> {
    let amount = parse_units(amount, session.pool.asset_decimals)?;
    let manager = session.quote_manager();
    let params = session.parameters(amount, recipient, extra_gas);
    if !params.can_request_quote() {
        bail!("quote inputs are incomplete or malformed");
    }

    // Failed fetches are not retried, so a missing first quote ends the session
    manager.update_parameters(params.clone()).await;
    if manager.snapshot().quote_commitment.is_none() {
        bail!("could not obtain a fee quote");
    }

    let (params_tx, params_rx) = watch::channel(params);
    let feed = manager.spawn_parameter_feed(params_rx, session.config.quote_throttle());
    let mut states = manager.subscribe();

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                if state.is_expired {
                    println!("⌛ Quote expired");
                    break;
                }
                if state.is_valid() {
                    println!(
                        "💱 fee {} bps (base {} bps), expires in {}s{}",
                        state.fee_bps.unwrap_or_default(),
                        state.base_fee_bps.unwrap_or_default(),
                        state.countdown,
                        state
                            .extra_gas_amount_eth
                            .as_deref()
                            .map(|eth| format!(", extra gas {} ETH", eth))
                            .unwrap_or_default(),
                    );
                } else if !manager.can_request_quote().await {
                    warn!("Quote inputs are incomplete or malformed");
                    break;
                } else if state.quote_commitment.is_none() && !manager.is_fetching() {
                    warn!("Quote was dropped and will not be retried");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    drop(params_tx);
    feed.abort();
    Ok(())
}

async fn run_withdraw(session: &Session, amount: &str, recipient: &str, balance: &str) -> Result<()> {
    let decimals = session.pool.asset_decimals;
    let amount = parse_units(amount, decimals)?;
    let balance = parse_units(balance, decimals)?;
    let recipient_address = parse_address(recipient)?;
    let account = session.pool_account(balance);
    let commitment = account
        .commitment()
        .cloned()
        .context("demo account has no commitment")?;

    let manager = session.quote_manager();
    manager
        .update_parameters(session.parameters(amount, recipient, false))
        .await;
    let quote = manager.snapshot();
    if !quote.is_valid() {
        bail!("could not obtain a fee quote");
    }

    let executor = session.executor();
    let prepared = if session.config.test_mode {
        None
    } else {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProofProgress>();
        let printer = tokio::spawn(async move {
            while let Some(event) = progress_rx.recv().await {
                println!("🔄 {:?} {:>3.0}%", event.phase, event.progress * 100.0);
            }
        });

        let request = ProofRequest {
            pool_account: Some(account.clone()),
            recipient: Some(recipient_address),
            asp_leaves: Some(vec![hash_to_field(b"other label"), commitment.label]),
            state_leaves: Some(vec![
                hash_to_field(b"other commitment"),
                commitment.hash,
                hash_to_field(b"third commitment"),
            ]),
            relayer_address: Some(session.relayer_address),
            fee_bps: quote.fee_bps,
            account_service: Some(session.accounts.clone() as Arc<dyn AccountService>),
            amount,
        };
        let prepared = session
            .orchestrator()
            .generate_withdrawal_proof(&session.pool, &request, Some(progress_tx))
            .await;
        let _ = printer.await;
        Some(prepared?)
    };

    session.chain.set_events(vec![MockChain::withdrawn_event(amount)]);
    let outcome = executor
        .withdraw(
            &session.pool,
            &ExecutionRequest {
                pool_account: Some(account),
                prepared,
                recipient: Some(recipient_address),
                relayer_address: Some(session.relayer_address),
                fee_commitment: quote.quote_commitment.clone(),
            },
        )
        .await?;

    println!("✅ Withdrawal transaction {}", outcome.tx_hash);
    if let Some(entry) = outcome.entry {
        println!(
            "📒 Remaining balance {} {} at block {}",
            format_units(entry.value, decimals)?,
            session.pool.asset,
            entry.block_number
        );
    }
    Ok(())
}

async fn run_exit(session: &Session, balance: &str) -> Result<()> {
    let decimals = session.pool.asset_decimals;
    let account = session.pool_account(parse_units(balance, decimals)?);

    let proof = session
        .orchestrator()
        .generate_ragequit_proof(&session.pool, Some(&account))
        .await?;

    if let (Some(owner), Some(commitment)) = (session.wallet.address(), account.commitment()) {
        session
            .chain
            .set_events(vec![MockChain::ragequit_event(owner, commitment)]);
    }

    let outcome = session
        .executor()
        .ragequit(
            &session.pool,
            &RagequitRequest {
                pool_account: Some(account),
                proof: Some(proof),
            },
        )
        .await?;

    println!("✅ Ragequit transaction {}", outcome.tx_hash);
    if let Some(entry) = outcome.entry {
        println!(
            "📒 Exited {} {} at block {}",
            format_units(entry.value, decimals)?,
            session.pool.asset,
            entry.block_number
        );
    }
    Ok(())
}

fn classify(message: &str) {
    match classify_revert(message) {
        Some(error) => println!("Known pool error: {}", error.selector_name()),
        None => println!("Unrecognised error"),
    }
    println!("User message: {}", revert_user_message(message));

    let wallet_error = CapabilityError::new(message);
    if is_user_behaviour(&wallet_error) {
        println!("Wallet user behaviour: shown to the user, not reported");
    }
}
