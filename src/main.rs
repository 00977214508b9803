use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use enroll_assist::config::EngineConfig;
use enroll_assist::engine::{ChatEngine, ChatService, IncomingTurn};
use enroll_assist::extract::{DisabledExtractor, FieldExtractor, LlmFieldExtractor};
use enroll_assist::form::{load_form, FormRegistry};
use enroll_assist::llm::{create_provider, LlmBackend, LlmConfig};
use enroll_assist::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let form_path = std::env::var("ENROLL_FORM_CONFIG")
        .unwrap_or_else(|_| "config/form.yaml".to_string());
    let db_path =
        std::env::var("ENROLL_DB_PATH").unwrap_or_else(|_| "./data/enroll-assist.db".to_string());

    // The form definition must be valid before a single turn is served.
    let form = Arc::new(FormRegistry::new(load_form(Path::new(&form_path))?));

    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(Path::new(&db_path)).await?);

    // Extraction oracle: Anthropic or OpenAI when a key is present,
    // otherwise the deterministic fallback carries every turn.
    let extractor: Arc<dyn FieldExtractor> = if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        let model = std::env::var("ENROLL_MODEL")
            .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string());
        let provider = create_provider(&LlmConfig {
            backend: LlmBackend::Anthropic,
            api_key: secrecy::SecretString::from(key),
            model,
            base_url: None,
            timeout: Duration::from_secs(20),
        })?;
        Arc::new(LlmFieldExtractor::new(provider))
    } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        let model = std::env::var("ENROLL_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let provider = create_provider(&LlmConfig {
            backend: LlmBackend::OpenAi,
            api_key: secrecy::SecretString::from(key),
            model,
            base_url: None,
            timeout: Duration::from_secs(20),
        })?;
        Arc::new(LlmFieldExtractor::new(provider))
    } else {
        tracing::warn!("No API key set — semantic extraction disabled, using deterministic fallback");
        Arc::new(DisabledExtractor)
    };

    let engine = Arc::new(ChatEngine::new(
        form.clone(),
        extractor,
        db.clone(),
        EngineConfig::default(),
    ));
    let service = ChatService::new(engine, db);

    let session_id = uuid::Uuid::new_v4().to_string();
    eprintln!("📝 Enroll Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Form: {form_path}");
    eprintln!("   Session: {session_id}");
    eprintln!("   Type a message and press Enter. /reload reloads the form, /quit exits.\n");

    let welcome = form.snapshot().messages().welcome();
    if !welcome.is_empty() {
        println!("{welcome}\n");
    }

    let stdin = tokio::io::stdin();
    let reader = BufReader::new(stdin);
    let mut lines = reader.lines();

    eprint!("> ");
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            eprint!("> ");
            continue;
        }
        match line {
            "/quit" | "/exit" => break,
            "/reload" => {
                match form.reload_from_path(Path::new(&form_path)) {
                    Ok(()) => eprintln!("🔄 Form definition reloaded"),
                    Err(e) => eprintln!("❌ Reload failed, keeping active snapshot: {e}"),
                }
                eprint!("> ");
                continue;
            }
            _ => {}
        }

        let result = service
            .process_message(&session_id, IncomingTurn::text(line))
            .await;
        println!("\n{}\n", result.response);
        eprintln!(
            "   [{} · {} · {:.0}%]",
            result.phase, result.current_step, result.completion_percentage
        );
        eprint!("> ");
    }

    Ok(())
}
