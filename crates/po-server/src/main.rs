// `po` CLI: boots an environment and runs one of its front-ends (spec §6
// "Deployment shapes"). Argument parsing follows the hand-rolled
// `env::args()` loop everruns-api/src/bin/reencrypt_secrets.rs uses for its
// own bin targets; no CLI-parsing crate is in use anywhere upstream.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use po_core::bus::MessageBus;
use po_core::llm::LlmRegistry;
use po_engine::{build_environment, Runner};
use po_server::state::AppState;
use po_server::{mcp, rest, ws};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    if let Ok(path) = dotenvy::dotenv() {
        tracing::info!(path = %path.display(), "loaded .env");
    }

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    match command {
        Some("serve") => cmd_serve(&args[2..]).await,
        Some("tui") => cmd_tui(&args[2..]).await,
        Some("mcp") => cmd_mcp(&args[2..]).await,
        Some("new") => cmd_new(&args[2..]),
        Some("export") => cmd_export(&args[2..]).await,
        Some("import") => cmd_import(&args[2..]),
        Some("--help") | Some("-h") | None => {
            print_help();
            Ok(())
        }
        Some(other) => {
            eprintln!("Unknown command: {other}");
            print_help();
            std::process::exit(1);
        }
    }
}

fn print_help() {
    eprintln!(
        r#"
po - PromptObjects runtime

USAGE:
    po <COMMAND> [ARGS]

COMMANDS:
    serve <env-dir> [--addr ADDR]   Run the axum HTTP+WS server over an environment
    tui <env-dir>                   Run a minimal stdin/stdout REPL over an environment
    mcp <env-dir>                   Run the MCP stdio JSON-RPC transport
    new <name> [--path DIR]         Scaffold a new environment directory
    export <env-dir> [-o OUT]       Copy an environment's objects/primitives/sessions.db tree to OUT
    import <bundle-dir> [--path DIR] Copy an exported bundle into a new environment directory

ENVIRONMENT:
    PROMPT_OBJECTS_DIR   Default environment directory when one isn't passed positionally
    OPENAI_API_KEY       Enables the "openai" LLM provider
    ANTHROPIC_API_KEY    Enables the "anthropic" LLM provider
    PO_DEFAULT_MODEL     Model string passed to the resolved provider (default: gpt-4o)
    PO_DEFAULT_PROVIDER  Provider name LlmRegistry falls back to (default: first one registered)
"#
    );
}

fn resolve_env_dir(rest: &[String]) -> Result<PathBuf> {
    let positional = rest.iter().find(|a| !a.starts_with('-'));
    let dir = positional
        .cloned()
        .or_else(|| env::var("PROMPT_OBJECTS_DIR").ok())
        .context("environment directory required (pass it positionally or set PROMPT_OBJECTS_DIR)")?;
    Ok(PathBuf::from(dir))
}

fn flag_value<'a>(rest: &'a [String], flag: &str) -> Option<&'a str> {
    rest.iter()
        .position(|a| a == flag)
        .and_then(|i| rest.get(i + 1))
        .map(String::as_str)
}

fn build_llm_registry() -> Result<LlmRegistry> {
    let default_provider_name = env::var("PO_DEFAULT_PROVIDER").ok();
    let mut providers: Vec<(String, Arc<dyn po_core::llm::LlmProvider>)> = Vec::new();

    if env::var("OPENAI_API_KEY").is_ok() {
        providers.push(("openai".to_string(), Arc::new(po_openai::OpenAiProvider::from_env()?)));
    }
    if env::var("ANTHROPIC_API_KEY").is_ok() {
        providers.push(("anthropic".to_string(), Arc::new(po_anthropic::AnthropicProvider::from_env()?)));
    }
    if providers.is_empty() {
        bail!("no LLM provider configured: set OPENAI_API_KEY and/or ANTHROPIC_API_KEY");
    }

    let default_index = match &default_provider_name {
        Some(name) => providers
            .iter()
            .position(|(n, _)| n == name)
            .with_context(|| format!("PO_DEFAULT_PROVIDER={name} but no matching provider is configured"))?,
        None => 0,
    };
    let (default_name, default_provider) = providers[default_index].clone();

    let mut registry = LlmRegistry::new(default_name, default_provider);
    for (name, provider) in providers {
        registry.register(name, provider);
    }
    Ok(registry)
}

async fn boot(root: PathBuf) -> Result<(Arc<po_core::environment::Environment>, Arc<Runner>)> {
    let db_path = root.join("sessions.db");
    let store = po_storage::SqliteThreadStore::open(&db_path)
        .await
        .with_context(|| format!("opening session store at {}", db_path.display()))?;
    let bus = Arc::new(MessageBus::new());
    let llm = build_llm_registry()?;
    let default_model = env::var("PO_DEFAULT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

    let (env, report) = build_environment(root, store, bus, llm, default_model).await?;
    for error in &report.prompt_objects.errors {
        tracing::warn!(path = %error.path.display(), error = %error.message, "skipped malformed prompt object");
    }
    for error in &report.primitives.errors {
        tracing::warn!(path = %error.path.display(), error = %error.message, "skipped malformed primitive source");
    }
    tracing::info!(
        prompt_objects = report.prompt_objects.loaded.len(),
        primitives = report.primitives.loaded.len(),
        "environment booted"
    );

    let runner = Arc::new(Runner::new());
    Ok((env, runner))
}

async fn cmd_serve(rest: &[String]) -> Result<()> {
    let root = resolve_env_dir(rest)?;
    let addr = flag_value(rest, "--addr").unwrap_or("127.0.0.1:8787");
    let (env, runner) = boot(root).await?;
    let state = AppState::new(env, runner);

    let app = rest::routes(state.clone())
        .merge(ws::routes(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "po server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn cmd_mcp(rest: &[String]) -> Result<()> {
    let root = resolve_env_dir(rest)?;
    let (env, _runner) = boot(root).await?;
    mcp::serve_stdio(env).await
}

async fn cmd_tui(rest: &[String]) -> Result<()> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let root = resolve_env_dir(rest)?;
    let (env, _runner) = boot(root).await?;

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        stdout.write_all(b"po> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        let Some((po_name, message)) = line.split_once(' ') else {
            stdout
                .write_all(b"usage: <po-name> <message>\n")
                .await?;
            continue;
        };
        match env.send_message(po_name, serde_json::json!(message), None, po_core::session::Source::Tui).await {
            Ok(reply) => {
                stdout.write_all(reply.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
            }
            Err(e) => {
                stdout.write_all(format!("error: {}\n", e.user_message()).as_bytes()).await?;
            }
        }
    }
    Ok(())
}

fn cmd_new(rest: &[String]) -> Result<()> {
    let name = rest
        .iter()
        .find(|a| !a.starts_with('-'))
        .context("usage: po new <name> [--path DIR]")?;
    let base = flag_value(rest, "--path").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    let root = base.join(name);

    if root.exists() {
        bail!("{} already exists", root.display());
    }
    std::fs::create_dir_all(root.join(po_core::loader::OBJECTS_DIR))?;
    std::fs::create_dir_all(root.join(po_core::loader::PRIMITIVES_DIR))?;

    let welcome = po_core::config::PromptObjectFile {
        config: po_core::config::PromptObjectConfig::new("welcome"),
        body: "You are the first prompt object in a freshly scaffolded environment. \
               Say hello and explain what you can help with."
            .to_string(),
    };
    let rendered = po_core::loader::render_po_file(&welcome)?;
    std::fs::write(po_core::loader::po_file_path(&root, "welcome"), rendered)?;

    println!("created environment at {}", root.display());
    Ok(())
}

async fn cmd_export(rest: &[String]) -> Result<()> {
    let root = resolve_env_dir(rest)?;
    let out = flag_value(rest, "-o")
        .or_else(|| flag_value(rest, "--out"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("{}-export", root.file_name().unwrap_or_default().to_string_lossy())));

    // No archive crate is in use anywhere upstream; an export is a
    // directory-tree copy of the environment rather than a single file.
    copy_dir_recursive(&root, &out)
        .with_context(|| format!("copying {} to {}", root.display(), out.display()))?;
    println!("exported {} to {}", root.display(), out.display());
    Ok(())
}

fn cmd_import(rest: &[String]) -> Result<()> {
    let bundle = rest
        .iter()
        .find(|a| !a.starts_with('-'))
        .context("usage: po import <bundle-dir> [--path DIR]")?;
    let bundle = PathBuf::from(bundle);
    let dest = flag_value(rest, "--path")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(bundle.file_name().unwrap_or_default()));

    if dest.exists() {
        bail!("{} already exists", dest.display());
    }
    copy_dir_recursive(&bundle, &dest)
        .with_context(|| format!("copying {} to {}", bundle.display(), dest.display()))?;
    println!("imported {} into {}", bundle.display(), dest.display());
    Ok(())
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let dest_path = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dest_path)?;
        } else {
            std::fs::copy(entry.path(), &dest_path)?;
        }
    }
    Ok(())
}
