use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "cambio")]
#[command(about = "Daily multi-currency inventory ledger for an exchange counter", long_about = None)]
pub struct Cli {
    /// Override cambio home directory (config/data subdirs will be created inside it).
    #[arg(long, env = "CAMBIO_HOME")]
    pub home: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Record a purchase of foreign currency from a customer.
    Buy(TradeArgs),
    /// Record a sale of foreign currency to a customer.
    Sell(TradeArgs),
    /// Record a manual stock adjustment (signed).
    Adjust(AdjustArgs),

    Inventory(InventoryArgs),
    Reconcile(ReconcileArgs),
    /// Running balance per currency after each transaction.
    Balances(BalancesArgs),

    Tx(TxArgs),
    Adjustment(AdjustmentArgs),

    Config(ConfigArgs),
    Ws(WsArgs),
}

#[derive(Debug, Args)]
pub struct TradeArgs {
    pub amount: String,
    pub currency: String,

    /// Value of the trade in the local currency.
    #[arg(long)]
    pub counter_value: Option<String>,

    #[arg(long)]
    pub customer: Option<String>,

    #[arg(long)]
    pub staff: Option<String>,

    /// Where the trade came from (counter, phone order, ...).
    #[arg(long)]
    pub source: Option<String>,

    /// Ledger day (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    pub date: Option<String>,
}

#[derive(Debug, Args)]
pub struct AdjustArgs {
    #[arg(allow_negative_numbers = true)]
    pub amount: String,
    pub currency: String,

    #[arg(long)]
    pub reason: String,

    #[arg(long)]
    pub author: Option<String>,

    #[arg(long)]
    pub date: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum InventoryCmd {
    /// Recompute one day and cascade forward (all configured currencies by default).
    Update {
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        currency: Option<String>,
    },
    /// Recompute every day in a range, oldest first.
    Rebuild {
        currency: String,
        #[arg(long)]
        from: String,
        /// Defaults to today.
        #[arg(long)]
        to: Option<String>,
    },
    Show {
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct InventoryArgs {
    #[command(subcommand)]
    pub cmd: InventoryCmd,
}

#[derive(Debug, Args)]
pub struct ReconcileArgs {
    #[arg(long)]
    pub date: Option<String>,

    /// Only this currency (defaults to all configured currencies).
    #[arg(long)]
    pub currency: Option<String>,

    /// Re-run the inventory update for any day that did not reconcile.
    #[arg(long)]
    pub repair: bool,
}

#[derive(Debug, Args)]
pub struct BalancesArgs {
    #[arg(long)]
    pub currency: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum TxCmd {
    Show { id: String },
}

#[derive(Debug, Args)]
pub struct TxArgs {
    #[command(subcommand)]
    pub cmd: TxCmd,
}

#[derive(Debug, Subcommand)]
pub enum AdjustmentCmd {
    Show { id: String },
}

#[derive(Debug, Args)]
pub struct AdjustmentArgs {
    #[command(subcommand)]
    pub cmd: AdjustmentCmd,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCmd {
    Show,
    /// How a day without a previous-day entry finds its opening balance.
    Lookup {
        /// previous-day | nearest-prior
        mode: String,
    },
    /// Replace the list of currencies the counter keeps inventory for.
    Currencies {
        #[arg(required = true)]
        codes: Vec<String>,
    },
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigCmd,
}

#[derive(Debug, Subcommand)]
pub enum WsCmd {
    Check,
    Add { name: String },
    Checkout { name: String },
}

#[derive(Debug, Args)]
pub struct WsArgs {
    #[command(subcommand)]
    pub cmd: WsCmd,
}
