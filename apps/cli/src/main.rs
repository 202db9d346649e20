use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use mdihost_core::{insertion_index, EntryId, OrderHint};
use mdihost_settings::auto_open::{decode, encode};
use mdihost_settings::{
    AutoOpenStore, FileStorage, MdiPreferences, PreferencesStore, SaveOutcome, StateStorage,
    ViewState,
};
use serde_json::{json, Value as SerdeValue};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "MDIHOST_LOG";
const DEFAULT_STATE_DIR: &str = ".mdihost";

#[derive(Parser)]
#[command(
    name = "mdihost",
    about = "Inspect and maintain persisted MDI state",
    author,
    version
)]
struct Cli {
    /// 狀態檔所在目錄。 / Directory holding the state files.
    #[arg(long, global = true, value_name = "PATH")]
    state_dir: Option<PathBuf>,
    /// 覆寫設定檔中的執行個體名稱。 / Instance name; overrides the configuration file.
    #[arg(long, global = true, value_name = "NAME")]
    instance: Option<String>,
    /// MDI 設定檔；預設為 `<state-dir>/mdi.json`。 / MDI configuration file.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 列出自動開啟紀錄。 / List auto-open records and view state.
    Inspect(InspectArgs),
    /// 將舊格式轉換為目前格式。 / Rewrite a legacy auto-open map in the current format.
    Migrate,
    /// 移除項目的自動開啟紀錄。 / Drop the auto-open record of an entry.
    Forget(ForgetArgs),
    /// 取消使用者關閉的紀錄。 / Allow a user-closed entry to be shown again.
    Reopen(ReopenArgs),
    /// 偏好的項目順序。 / Preferred entry order.
    #[command(subcommand)]
    Order(OrderCommand),
    /// 計算新項目的插入位置。 / Compute where a newly shown entry would be inserted.
    Place(PlaceArgs),
}

#[derive(Args)]
struct InspectArgs {
    /// 以 JSON 輸出。 / Print JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ForgetArgs {
    id: String,
}

#[derive(Args)]
struct ReopenArgs {
    id: String,
}

#[derive(Subcommand)]
enum OrderCommand {
    /// 顯示偏好順序。 / Print the preferred order.
    Show,
    /// 取代偏好順序。 / Replace the preferred order.
    Set {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[derive(Args)]
struct PlaceArgs {
    /// 新項目的識別碼。 / Id of the entry being shown.
    id: String,
    /// 目前開啟的項目（依顯示順序）。 / Open entries in display order.
    #[arg(long, value_delimiter = ',', value_name = "IDS")]
    open: Vec<String>,
    /// `""` 置頂、`~x` 置於 x 之前、`x` 置於 x 之後。 / Placement hint: `""` first, `~x` before x, `x` after x.
    #[arg(long, allow_hyphen_values = true)]
    hint: Option<String>,
}

struct StateContext {
    prefs: MdiPreferences,
    storage: FileStorage,
}

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let ctx = resolve_context(&cli)?;
    match cli.command {
        Commands::Inspect(args) => inspect(&ctx, args.json),
        Commands::Migrate => migrate(&ctx),
        Commands::Forget(args) => forget(&ctx, &args.id),
        Commands::Reopen(args) => reopen(&ctx, &args.id),
        Commands::Order(OrderCommand::Show) => order_show(&ctx),
        Commands::Order(OrderCommand::Set { ids }) => order_set(&ctx, ids),
        Commands::Place(args) => place(&ctx, args),
    }
}

fn resolve_context(cli: &Cli) -> Result<StateContext> {
    let state_dir = match &cli.state_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()
            .context("failed to determine current directory")?
            .join(DEFAULT_STATE_DIR),
    };
    let config = cli
        .config
        .clone()
        .unwrap_or_else(|| state_dir.join("mdi.json"));
    let mut prefs = PreferencesStore::load(&config)
        .with_context(|| format!("failed to load {}", config.display()))?
        .into_preferences();
    if let Some(instance) = &cli.instance {
        prefs.instance = instance.clone();
        prefs.sanitize();
    }
    debug!(state_dir = %state_dir.display(), instance = %prefs.instance, "resolved MDI state");
    Ok(StateContext {
        prefs,
        storage: FileStorage::new(state_dir),
    })
}

fn load_store(ctx: &StateContext) -> AutoOpenStore {
    let mut store = AutoOpenStore::new(ctx.prefs.autoopen_key(), ctx.prefs.debouncer());
    store.load(&ctx.storage);
    store
}

fn load_views(ctx: &StateContext) -> ViewState {
    let mut views = ViewState::new(
        ctx.prefs.order_key(),
        ctx.prefs.once_key(),
        ctx.prefs.closed_key(),
    );
    views.load(&ctx.storage);
    views
}

fn inspect(ctx: &StateContext, as_json: bool) -> Result<()> {
    let store = load_store(ctx);
    let views = load_views(ctx);

    if as_json {
        let mut entries = Vec::with_capacity(store.len());
        for (id, record) in store.iter() {
            let value: SerdeValue =
                serde_json::to_value(record).with_context(|| format!("failed to encode '{id}'"))?;
            entries.push(json!({ "id": id, "value": value }));
        }
        let report = json!({
            "instance": ctx.prefs.instance,
            "initialId": store.initial_id(),
            "entries": entries,
            "order": views.preferred_order(),
            "loadedOnce": views.loaded_once().collect::<Vec<_>>(),
            "closedByUser": views
                .closed_by_user()
                .map(|(id, title)| json!({ "id": id, "title": title }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Instance: {}", ctx.prefs.instance);
    println!("Initial entry: {}", store.initial_id().unwrap_or("-"));
    if store.is_empty() {
        println!("No auto-open records.");
    } else {
        println!("Auto-open records:");
        for (id, record) in store.iter() {
            println!(
                "  - {id}: title={} datasource={} parent={}",
                record.title.as_deref().unwrap_or("-"),
                record.datasource_exportable.as_deref().unwrap_or("-"),
                record.parent_id.as_deref().unwrap_or("-"),
            );
        }
    }
    println!("Preferred order: {}", views.preferred_order().join(", "));
    println!(
        "Loaded once: {}",
        views.loaded_once().collect::<Vec<_>>().join(", ")
    );
    let closed: Vec<String> = views
        .closed_by_user()
        .map(|(id, title)| format!("{id} ({title})"))
        .collect();
    println!("Closed by user: {}", closed.join(", "));
    Ok(())
}

fn migrate(ctx: &StateContext) -> Result<()> {
    let key = ctx.prefs.autoopen_key();
    let Some(bytes) = ctx
        .storage
        .read(&key)
        .with_context(|| format!("failed to read '{key}'"))?
    else {
        println!("No auto-open state for instance '{}'.", ctx.prefs.instance);
        return Ok(());
    };
    let decoded = decode(&bytes).with_context(|| format!("failed to decode '{key}'"))?;
    if !decoded.migrated {
        println!(
            "Auto-open state already uses the current format ({} records).",
            decoded.records.len()
        );
        return Ok(());
    }
    let payload = encode(&decoded.records, decoded.initial_id.as_deref())?;
    ctx.storage
        .write(&key, &payload)
        .with_context(|| format!("failed to write '{key}'"))?;
    println!(
        "Migrated {} records ({} skipped).",
        decoded.records.len(),
        decoded.skipped
    );
    Ok(())
}

fn forget(ctx: &StateContext, id: &str) -> Result<()> {
    let mut store = load_store(ctx);
    if store.remove_record(id, Instant::now()).is_none() {
        bail!("no auto-open record for '{id}'");
    }
    match store.save(&ctx.storage, false, |_| None)? {
        SaveOutcome::Written { records } => {
            println!("Forgot '{id}' ({records} records remain).");
        }
        outcome => bail!("auto-open state was not saved: {outcome:?}"),
    }
    Ok(())
}

fn reopen(ctx: &StateContext, id: &str) -> Result<()> {
    let mut views = load_views(ctx);
    let Some(title) = views.clear_closed_by_user(id) else {
        bail!("'{id}' was not closed by the user");
    };
    views.save(&ctx.storage)?;
    println!("'{id}' ({title}) will be shown again.");
    Ok(())
}

fn order_show(ctx: &StateContext) -> Result<()> {
    let views = load_views(ctx);
    if views.preferred_order().is_empty() {
        println!("No preferred order.");
    } else {
        for (index, id) in views.preferred_order().iter().enumerate() {
            println!("{index}: {id}");
        }
    }
    Ok(())
}

fn order_set(ctx: &StateContext, ids: Vec<String>) -> Result<()> {
    let mut views = load_views(ctx);
    views.set_preferred_order(ids);
    views.save(&ctx.storage)?;
    println!("Preferred order: {}", views.preferred_order().join(", "));
    Ok(())
}

fn place(ctx: &StateContext, args: PlaceArgs) -> Result<()> {
    let views = load_views(ctx);
    let open: Vec<EntryId> = args
        .open
        .iter()
        .filter(|id| !id.is_empty())
        .map(|id| EntryId::from(id.as_str()))
        .collect();
    if open.iter().any(|id| id.as_str() == args.id) {
        bail!("'{}' is already open", args.id);
    }
    let hint = args.hint.as_deref().map(OrderHint::parse);
    let index = insertion_index(&args.id, hint.as_ref(), &open, views.preferred_order());

    let mut layout: Vec<&str> = open.iter().map(EntryId::as_str).collect();
    layout.insert(index, &args.id);
    println!("Insert '{}' at index {index}", args.id);
    println!("Resulting order: {}", layout.join(", "));
    Ok(())
}
