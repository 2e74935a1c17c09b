use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use fleet_core::{Action, CallId, Entity};
use fleet_models::node::NodeActionParams;
use fleet_models::{
    controller, machine, pod, tag, token, ControllerSlice, MachineSlice, Model, PodDeleteParams, PodSlice,
    RootState, TagSearchFilter, TagSlice, TokenSlice,
};
use fleet_select::{BaseSelectors, SearchFilter};
use fleet_store::{EntityState, Slice, StatusKind};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

mod replay;

#[derive(Parser, Debug)]
#[command(name = "fleetctl", version, about = "Inspect fleet state rebuilt from an action log")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// JSON-lines action log to replay before answering ("-" reads stdin)
    #[arg(short = 'f', long = "actions", env = "FLEET_ACTION_LOG", global = true)]
    actions: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Flags and counts per slice
    Summary {
        #[arg(value_parser = parse_model)]
        model: Option<Model>,
    },
    /// List the items of a model
    Ls {
        #[arg(value_parser = parse_model)]
        model: Model,
    },
    /// Show one item by primary key
    Get {
        #[arg(value_parser = parse_model)]
        model: Model,
        key: String,
    },
    /// Search items by name
    Search(SearchArgs),
    /// In-flight operations per item
    Statuses {
        #[arg(value_parser = parse_model)]
        model: Model,
    },
    /// Errors recorded per event and item
    Errors {
        #[arg(value_parser = parse_model)]
        model: Model,
    },
    /// Machine or controller hosting a pod
    Host { pod_id: u32 },
    /// Print the request action for a verb without replaying anything
    Request(RequestArgs),
}

#[derive(Args, Debug)]
struct SearchArgs {
    #[arg(value_parser = parse_model)]
    model: Model,
    /// Substring to match; omitted matches everything
    term: Option<String>,
    /// Tag category (all, manual, auto)
    #[arg(long = "filter", value_parser = parse_tag_filter)]
    filter: Option<TagSearchFilter>,
    /// Rank by fuzzy score instead of substring match
    #[arg(long = "fuzzy", action = ArgAction::SetTrue)]
    fuzzy: bool,
    /// Limit results
    #[arg(long = "limit", default_value_t = 20)]
    limit: usize,
}

#[derive(Args, Debug)]
struct RequestArgs {
    #[arg(value_parser = parse_model)]
    model: Model,
    /// fetch, get, create, update, delete, cleanup, removeRequest, setActive
    /// or a status verb (refresh, deploy, ...)
    verb: String,
    /// Primary key; comma-separated for controller image checks
    #[arg(long = "key")]
    key: Option<String>,
    /// Request params as a JSON object
    #[arg(long = "params")]
    params: Option<String>,
    /// Call id of a list, count or bulk action; machine fetch and count
    /// generate one when omitted
    #[arg(long = "call-id")]
    call_id: Option<String>,
}

fn parse_model(s: &str) -> Result<Model, String> {
    Model::from_str(s).map_err(|e| e.to_string())
}

fn parse_tag_filter(s: &str) -> Result<TagSearchFilter, String> {
    TagSearchFilter::from_str(s)
}

fn init_tracing() {
    let env = std::env::var("FLEET_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("FLEET_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid FLEET_METRICS_ADDR; expected host:port");
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

async fn load_state(actions: Option<&PathBuf>) -> Result<Arc<RootState>> {
    let Some(path) = actions else {
        warn!("no action log given; state is empty");
        return Ok(Arc::new(RootState::default()));
    };
    let actions = replay::read_actions(path)?;
    let cap = env_or("FLEET_QUEUE_CAP", 2048usize);
    let wait = Duration::from_secs(env_or("FLEET_WAIT_SECS", 8u64));
    replay::replay(actions, cap, wait).await
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    if let Commands::Request(args) = &cli.command {
        let action = build_request(args)?;
        return match cli.output {
            Output::Human => {
                println!("{}", serde_json::to_string(&action)?);
                Ok(())
            }
            Output::Json => print_json(&action),
        };
    }

    let root = load_state(cli.actions.as_ref()).await?;
    match cli.command {
        Commands::Summary { model } => {
            let summaries: Vec<_> = match model {
                Some(m) => vec![root.summary(m)],
                None => Model::ALL.iter().map(|m| root.summary(*m)).collect(),
            };
            match cli.output {
                Output::Human => {
                    println!("MODEL        COUNT  LOADED  LOADING  SAVING  PROCESSING  ERRORS");
                    for s in summaries {
                        println!(
                            "{:<12} {:<6} {:<7} {:<8} {:<7} {:<11} {}",
                            s.model,
                            s.count,
                            s.loaded,
                            s.loading,
                            s.saving,
                            s.processing,
                            s.errors.as_deref().unwrap_or("-")
                        );
                    }
                }
                Output::Json => print_json(&summaries)?,
            }
        }
        Commands::Ls { model } => {
            info!(%model, "ls invoked");
            let hits = list(&root, model);
            render_hits(cli.output, &hits)?;
        }
        Commands::Get { model, key } => {
            let Some(item) = root.item_json(model, &key) else {
                bail!("no {model} with key {key}");
            };
            print_json(&item)?;
        }
        Commands::Search(args) => {
            info!(model = %args.model, term = ?args.term, fuzzy = args.fuzzy, "search invoked");
            let hits = search(&root, &args)?;
            render_hits(cli.output, &hits)?;
        }
        Commands::Statuses { model } => {
            let statuses = root.statuses_json(model);
            match cli.output {
                Output::Human => {
                    println!("KEY                  IN FLIGHT");
                    for (key, record) in &statuses {
                        let active: Vec<&str> = record
                            .as_object()
                            .map(|flags| {
                                flags.iter().filter(|(_, v)| v.as_bool() == Some(true)).map(|(k, _)| k.as_str()).collect()
                            })
                            .unwrap_or_default();
                        let col = if active.is_empty() { "-".to_string() } else { active.join(",") };
                        println!("{:<20} {}", key, col);
                    }
                }
                Output::Json => {
                    let map: Map<String, Value> = statuses.into_iter().collect();
                    print_json(&map)?;
                }
            }
        }
        Commands::Errors { model } => {
            let errors = root.event_errors_json(model);
            match cli.output {
                Output::Human => {
                    if let Some(e) = root.summary(model).errors {
                        println!("slice error: {e}");
                    }
                    println!("EVENT            ID                   ERROR");
                    for e in &errors {
                        println!(
                            "{:<16} {:<20} {}",
                            e["event"].as_str().unwrap_or("-"),
                            render_scalar(&e["id"]),
                            render_scalar(&e["error"])
                        );
                    }
                }
                Output::Json => print_json(&errors)?,
            }
        }
        Commands::Host { pod_id } => {
            let host = pod::get_host(&root, pod_id);
            match cli.output {
                Output::Human => match &*host {
                    Some(h) => println!("{} {}", h.system_id(), h.hostname()),
                    None => eprintln!("pod {pod_id} has no known host"),
                },
                Output::Json => print_json(&*host)?,
            }
        }
        Commands::Request(_) => {}
    }

    Ok(())
}

fn render_scalar(v: &Value) -> String {
    match v {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One item as printed by `ls` and `search`.
#[derive(Debug)]
struct Hit {
    key: String,
    name: String,
    item: Value,
}

fn render_hits(output: Output, hits: &[Hit]) -> Result<()> {
    match output {
        Output::Human => {
            println!("KEY                  NAME");
            for h in hits {
                println!("{:<20} {}", h.key, h.name);
            }
            Ok(())
        }
        Output::Json => {
            let items: Vec<&Value> = hits.iter().map(|h| &h.item).collect();
            print_json(&items)
        }
    }
}

fn hit<T: Entity, F: SearchFilter<T>>(sel: &BaseSelectors<T, F>, item: &T) -> Hit {
    Hit {
        key: item.key().to_string(),
        name: sel.text(item).to_string(),
        item: serde_json::to_value(item).unwrap_or(Value::Null),
    }
}

fn list_in<T: Entity, F: SearchFilter<T>, S: StatusKind, X>(
    sel: &BaseSelectors<T, F>,
    state: &EntityState<T, S, X>,
) -> Vec<Hit> {
    sel.all(state).iter().map(|item| hit(sel, item)).collect()
}

fn list(root: &RootState, model: Model) -> Vec<Hit> {
    match model {
        Model::Machine => list_in(&*machine::SELECTORS, &root.machine),
        Model::Controller => list_in(&*controller::SELECTORS, &root.controller),
        Model::Pod => list_in(&*pod::SELECTORS, &root.pod),
        Model::Tag => list_in(&*tag::SELECTORS, &root.tag),
        Model::Token => list_in(&*token::SELECTORS, &root.token),
    }
}

fn search_in<T: Entity, F: SearchFilter<T>, S: StatusKind, X>(
    sel: &BaseSelectors<T, F>,
    state: &EntityState<T, S, X>,
    args: &SearchArgs,
    filter: Option<F>,
) -> Vec<Hit> {
    let found = if args.fuzzy {
        sel.fuzzy_search(state, args.term.as_deref().unwrap_or(""))
    } else {
        sel.search(state, args.term.as_deref(), filter)
    };
    for (memo, stats) in sel.memo_stats() {
        debug!(memo, entries = stats.len, hits = stats.hits, misses = stats.misses, "selector cache");
    }
    found.iter().take(args.limit).map(|item| hit(sel, item)).collect()
}

fn search(root: &RootState, args: &SearchArgs) -> Result<Vec<Hit>> {
    if args.filter.is_some() && args.model != Model::Tag {
        bail!("--filter only applies to tags");
    }
    if args.fuzzy && args.filter.is_some() {
        bail!("--filter cannot be combined with --fuzzy");
    }
    Ok(match args.model {
        Model::Machine => search_in(&*machine::SELECTORS, &root.machine, args, None),
        Model::Controller => search_in(&*controller::SELECTORS, &root.controller, args, None),
        Model::Pod => search_in(&*pod::SELECTORS, &root.pod, args, None),
        Model::Tag => search_in(&*tag::SELECTORS, &root.tag, args, args.filter),
        Model::Token => search_in(&*token::SELECTORS, &root.token, args, None),
    })
}

/// Parses a key typed on the command line: JSON first (`808`), then as a
/// bare string (`abc123`).
fn parse_key<T: Entity>(raw: &str) -> Result<T::Key> {
    serde_json::from_str(raw)
        .or_else(|_| serde_json::from_value(Value::String(raw.to_string())))
        .with_context(|| format!("invalid {} key '{raw}'", T::MODEL))
}

fn parse_params(raw: Option<&str>) -> Result<Option<Value>> {
    raw.map(|s| serde_json::from_str(s).context("--params must be JSON")).transpose()
}

/// Node action params: `--key` targets one node, a `filter` entry in
/// `--params` targets many, every other entry is passed as an extra.
fn node_params(key: Option<&str>, params: Option<Value>) -> Result<NodeActionParams> {
    let mut extra = match params {
        Some(Value::Object(map)) => map,
        Some(Value::Null) | None => Map::new(),
        Some(other) => bail!("--params must be an object, got {other}"),
    };
    let filter = extra.remove("filter");
    if key.is_none() && filter.is_none() {
        bail!("node actions need --key or a filter in --params");
    }
    Ok(NodeActionParams { system_id: key.map(str::to_string), filter, extra })
}

/// `--key a,b,c` as a list of keys.
fn key_list(key: Option<&str>) -> Result<Vec<String>> {
    let raw = key.context("needs --key")?;
    Ok(raw.split(',').map(str::trim).filter(|k| !k.is_empty()).map(str::to_string).collect())
}

fn build_request(args: &RequestArgs) -> Result<Action> {
    let params = parse_params(args.params.as_deref())?;
    let call_id = args.call_id.as_deref().map(CallId::from);
    let key = args.key.as_deref();
    let verb = args.verb.as_str();
    match args.model {
        Model::Machine => match verb {
            "setActive" => Ok(MachineSlice::set_active(key)),
            "fetch" => Ok(MachineSlice::fetch_list(call_id.unwrap_or_else(CallId::generate), params)),
            "count" => {
                let filter = params.and_then(|mut p| p.get_mut("filter").map(Value::take));
                Ok(MachineSlice::count(call_id.unwrap_or_else(CallId::generate), filter))
            }
            "checkPower" => Ok(MachineSlice::check_power(key.context("checkPower needs --key")?)),
            _ => match machine::MachineStatus::from_name(verb) {
                Some(status) => Ok(MachineSlice::action(status, &node_params(key, params)?, call_id)),
                None => generic_request::<MachineSlice>(verb, key, params, call_id),
            },
        },
        Model::Controller => match verb {
            "setActive" => Ok(ControllerSlice::set_active(key)),
            "checkImages" => Ok(ControllerSlice::check_images(&key_list(key)?)),
            "pollCheckImages" => {
                let poll_id = args.call_id.as_deref().context("pollCheckImages needs --call-id as the poll id")?;
                Ok(ControllerSlice::poll_check_images(&key_list(key)?, poll_id))
            }
            "pollCheckImagesStop" => Ok(ControllerSlice::poll_check_images_stop(
                args.call_id.as_deref().context("pollCheckImagesStop needs --call-id as the poll id")?,
            )),
            _ => match controller::ControllerStatus::from_name(verb) {
                Some(status) => Ok(ControllerSlice::action(status, &node_params(key, params)?, call_id)),
                None => generic_request::<ControllerSlice>(verb, key, params, call_id),
            },
        },
        Model::Pod => match verb {
            "setActive" => Ok(PodSlice::set_active(key.map(parse_key::<pod::Pod>).transpose()?)),
            "compose" => Ok(PodSlice::compose(params.context("compose needs --params")?)),
            "getProjects" => Ok(PodSlice::get_projects(params.context("getProjects needs --params")?)),
            "pollLxdServer" => Ok(PodSlice::poll_lxd_server(params.context("pollLxdServer needs --params")?)),
            "pollLxdServerStop" => Ok(PodSlice::poll_lxd_server_stop()),
            "delete" => {
                let id = parse_key::<pod::Pod>(key.context("delete needs --key")?)?;
                let decompose = params.as_ref().and_then(|p| p.get("decompose")).and_then(Value::as_bool);
                Ok(PodSlice::delete_with(PodDeleteParams { id, decompose }))
            }
            _ => generic_request::<PodSlice>(verb, key, params, call_id),
        },
        Model::Tag => generic_request::<TagSlice>(verb, key, params, call_id),
        Model::Token => generic_request::<TokenSlice>(verb, key, params, call_id),
    }
}

fn generic_request<Sl: Slice>(
    verb: &str,
    raw_key: Option<&str>,
    params: Option<Value>,
    call_id: Option<CallId>,
) -> Result<Action> {
    let key = || -> Result<<Sl::Item as Entity>::Key> {
        parse_key::<Sl::Item>(raw_key.with_context(|| format!("{verb} needs --key"))?)
    };
    let action = match (verb, call_id) {
        ("fetch", Some(id)) => Sl::fetch_list(id, params),
        ("fetch", None) => Sl::fetch(),
        ("removeRequest", id) => Sl::remove_request(id.context("removeRequest needs --call-id")?),
        (verb, id) => {
            let action = match verb {
                "get" => Sl::get(&key()?),
                "create" => Sl::create(params.context("create needs --params")?),
                "update" => Sl::update(params.context("update needs --params")?),
                "delete" => Sl::delete(&key()?),
                "cleanup" => Sl::cleanup(),
                other => match Sl::Status::from_name(other) {
                    Some(status) => Sl::status_request(status, &key()?),
                    None => bail!("unknown {} verb '{other}'", Sl::Item::MODEL),
                },
            };
            match id {
                Some(id) => action.with_call_id(id),
                None => action,
            }
        }
    };
    Ok(action)
}
