use std::env;
use std::num::ParseIntError;
use std::sync::Arc;
use std::time::Duration;

use snafu::{OptionExt, ResultExt, Snafu};
use tracing_subscriber::EnvFilter;

use zova_replay::{HistoryError, LocalHistory, SettingsError, SettingsStore};
use zova_storage::{SqliteStorage, StorageError};
use zova_timeline::{
    ConversationId, InitOutcome, JumpOutcome, LoadOutcome, RenderState, ScrollState, SkipReason,
    TimelineController, TimelineError, TimelineView,
};

const DEFAULT_SEED_COUNT: usize = 200;
const DEFAULT_LIVE_COUNT: usize = 3;
const LIVE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
    db_path: Option<String>,
    conversation: Option<String>,
    count: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    Seed,
    Tail,
    History,
    Live,
    Jump,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "seed" => Some(Self::Seed),
            "tail" => Some(Self::Tail),
            "history" => Some(Self::History),
            "live" => Some(Self::Live),
            "jump" => Some(Self::Jump),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Tail => "tail",
            Self::History => "history",
            Self::Live => "live",
            Self::Jump => "jump",
        }
    }
}

#[derive(Debug, Snafu)]
enum ReplayError {
    #[snafu(display("missing required --scenario argument"))]
    MissingScenario { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("invalid --count value '{raw}': {source}"))]
    InvalidCount {
        stage: &'static str,
        raw: String,
        source: ParseIntError,
    },
    #[snafu(display("settings failed: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("failed to open history database '{db_path}': {source}"))]
    OpenStorage {
        stage: &'static str,
        db_path: String,
        source: StorageError,
    },
    #[snafu(display("local history failed: {source}"))]
    History {
        stage: &'static str,
        source: HistoryError,
    },
    #[snafu(display("pagination failed: {source}"))]
    Pagination {
        stage: &'static str,
        source: TimelineError,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
}

type ReplayResult<T> = Result<T, ReplayError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> ReplayResult<()> {
    let args = parse_args(env::args().skip(1))?;
    let settings_store = SettingsStore::load().context(SettingsSnafu {
        stage: "load-settings",
    })?;
    let settings = settings_store.settings();
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| settings.database_path.display().to_string());

    println!("scenario={}", args.scenario.name());
    println!("db_path={db_path}");

    let storage = SqliteStorage::open(&db_path).await.context(OpenStorageSnafu {
        stage: "open-history-database",
        db_path: db_path.clone(),
    })?;
    let history = Arc::new(LocalHistory::new(storage));
    let controller =
        TimelineController::new(history.clone(), history.clone(), settings.timeline.clone());

    match args.scenario {
        Scenario::Seed => run_seed(&history, &args).await?,
        Scenario::Tail => run_tail(&history, &controller, &args).await?,
        Scenario::History => run_history(&history, &controller, &args).await?,
        Scenario::Live => run_live(&history, &controller, &args).await?,
        Scenario::Jump => run_jump(&history, &controller, &args).await?,
    }

    println!("runner_ok=true");
    Ok(())
}

fn parse_args(args: impl IntoIterator<Item = String>) -> ReplayResult<RunnerArgs> {
    let mut scenario = None;
    let mut db_path = None;
    let mut conversation = None;
    let mut count = None;
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--scenario" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-scenario-value",
                    arg: "--scenario",
                })?;

                let parsed = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value,
                })?;
                scenario = Some(parsed);
            }
            "--db" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-db-value",
                    arg: "--db",
                })?;
                db_path = Some(value);
            }
            "--conversation" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-conversation-value",
                    arg: "--conversation",
                })?;
                conversation = Some(value);
            }
            "--count" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-count-value",
                    arg: "--count",
                })?;
                let parsed = value.parse::<usize>().context(InvalidCountSnafu {
                    stage: "parse-args-count",
                    raw: value.clone(),
                })?;
                count = Some(parsed);
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(RunnerArgs {
        scenario: scenario.context(MissingScenarioSnafu {
            stage: "parse-args-scenario-required",
        })?,
        db_path,
        conversation,
        count,
    })
}

async fn run_seed(history: &LocalHistory, args: &RunnerArgs) -> ReplayResult<()> {
    let conversation = seed_conversation(history, args.count.unwrap_or(DEFAULT_SEED_COUNT)).await?;
    println!("conversation_id={conversation}");
    Ok(())
}

async fn run_tail(
    history: &LocalHistory,
    controller: &TimelineController,
    args: &RunnerArgs,
) -> ReplayResult<()> {
    let conversation = resolve_conversation(history, args).await?;
    let mut view = controller.subscribe();

    let outcome = controller.init(conversation, None).await;
    println!("init={}", init_outcome_name(outcome));
    ensure_loaded("tail", outcome)?;
    report_state(&controller.state());
    report_directives(&mut view);
    Ok(())
}

async fn run_history(
    history: &LocalHistory,
    controller: &TimelineController,
    args: &RunnerArgs,
) -> ReplayResult<()> {
    let conversation = resolve_conversation(history, args).await?;
    let outcome = controller.init(conversation, None).await;
    println!("init={}", init_outcome_name(outcome));
    ensure_loaded("history", outcome)?;

    let top_pages = page_to_edge(controller, Edge::Top).await?;
    println!("top_pages={top_pages}");
    report_state(&controller.state());

    let bottom_pages = page_to_edge(controller, Edge::Bottom).await?;
    println!("bottom_pages={bottom_pages}");
    report_state(&controller.state());
    Ok(())
}

async fn run_live(
    history: &LocalHistory,
    controller: &TimelineController,
    args: &RunnerArgs,
) -> ReplayResult<()> {
    let conversation = resolve_conversation(history, args).await?;
    let mut view = controller.subscribe();
    let outcome = controller.init(conversation.clone(), None).await;
    println!("init={}", init_outcome_name(outcome));

    let mut last = None;
    for index in 0..args.count.unwrap_or(DEFAULT_LIVE_COUNT) {
        let message = history
            .post(&conversation, "replay", &format!("live message {index}"))
            .await
            .context(HistorySnafu {
                stage: "live-post",
            })?;
        last = Some(message.id);
    }
    let last = last.context(ScenarioFailedSnafu {
        stage: "live-post",
        scenario: "live",
        reason: "--count must be at least 1".to_string(),
    })?;

    let edited = history
        .edit(&conversation, &last, "live message, edited")
        .await
        .context(HistorySnafu {
            stage: "live-edit",
        })?;

    let caught_up = tokio::time::timeout(LIVE_TIMEOUT, async {
        loop {
            let Some(state) = view.changed().await else {
                return false;
            };
            let applied = state.window().is_some_and(|window| {
                window
                    .messages()
                    .last()
                    .is_some_and(|message| message.id == edited.id && message.content == edited.content)
            });
            if applied {
                return true;
            }
        }
    })
    .await
    .unwrap_or(false);

    println!("live_applied={caught_up}");
    if !caught_up {
        return ScenarioFailedSnafu {
            stage: "live-wait",
            scenario: "live",
            reason: "live events did not reach the timeline".to_string(),
        }
        .fail();
    }
    report_state(&controller.state());
    report_directives(&mut view);
    Ok(())
}

async fn run_jump(
    history: &LocalHistory,
    controller: &TimelineController,
    args: &RunnerArgs,
) -> ReplayResult<()> {
    let conversation = resolve_conversation(history, args).await?;
    let outcome = controller.init(conversation.clone(), None).await;
    ensure_loaded("jump", outcome)?;
    page_to_edge(controller, Edge::Top).await?;

    let anchor = controller
        .state()
        .window()
        .and_then(|window| window.first_id().cloned())
        .context(ScenarioFailedSnafu {
            stage: "jump-anchor",
            scenario: "jump",
            reason: "conversation has no messages".to_string(),
        })?;
    println!("anchor_id={anchor}");

    let mut view = controller.subscribe();
    let outcome = controller.init(conversation, Some(anchor)).await;
    println!("anchored_init={}", init_outcome_name(outcome));
    report_state(&controller.state());
    report_directives(&mut view);

    let jump = controller.jump_to_bottom(false).await;
    println!("jump={}", jump_outcome_name(jump));
    report_state(&controller.state());
    report_directives(&mut view);
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Edge {
    Top,
    Bottom,
}

/// Paginates until the window reports the edge reached; returns applied pages.
async fn page_to_edge(controller: &TimelineController, edge: Edge) -> ReplayResult<usize> {
    let mut pages = 0;
    loop {
        let outcome = match edge {
            Edge::Top => controller.load_top(None).await,
            Edge::Bottom => controller.load_bottom(None).await,
        }
        .context(PaginationSnafu {
            stage: "page-to-edge",
        })?;

        match outcome {
            LoadOutcome::Applied { fetched } => {
                tracing::debug!(?edge, fetched, "page applied");
                pages += 1;
            }
            LoadOutcome::Skipped(SkipReason::AtEdge | SkipReason::NotRendering) => {
                return Ok(pages);
            }
            other => {
                return ScenarioFailedSnafu {
                    stage: "page-to-edge",
                    scenario: "history",
                    reason: format!("unexpected load outcome {other:?}"),
                }
                .fail();
            }
        }
    }
}

async fn resolve_conversation(
    history: &LocalHistory,
    args: &RunnerArgs,
) -> ReplayResult<ConversationId> {
    if let Some(raw) = args.conversation.as_deref() {
        println!("conversation_id={raw}");
        return Ok(ConversationId::new(raw));
    }

    let conversation = seed_conversation(history, args.count.unwrap_or(DEFAULT_SEED_COUNT)).await?;
    println!("conversation_id={conversation}");
    Ok(conversation)
}

async fn seed_conversation(history: &LocalHistory, count: usize) -> ReplayResult<ConversationId> {
    let conversation = history
        .create_conversation("Replay")
        .await
        .context(HistorySnafu {
            stage: "seed-create-conversation",
        })?;
    for index in 0..count {
        history
            .post(&conversation, "seed", &format!("seeded message {index}"))
            .await
            .context(HistorySnafu {
                stage: "seed-post",
            })?;
    }
    println!("seeded={count}");
    Ok(conversation)
}

fn ensure_loaded(scenario: &'static str, outcome: InitOutcome) -> ReplayResult<()> {
    match outcome {
        InitOutcome::Rendered | InitOutcome::Empty => Ok(()),
        InitOutcome::WaitingForNetwork | InitOutcome::Discarded => ScenarioFailedSnafu {
            stage: "ensure-loaded",
            scenario,
            reason: format!("initial load ended as {}", init_outcome_name(outcome)),
        }
        .fail(),
    }
}

fn report_state(state: &RenderState) {
    println!("state={}", state.kind());
    let Some(window) = state.window() else {
        return;
    };
    println!("window_len={}", window.len());
    println!("at_top={}", window.at_top());
    println!("at_bottom={}", window.at_bottom());
    if let Some(first) = window.first_id() {
        println!("first_id={first}");
    }
    if let Some(last) = window.last_id() {
        println!("last_id={last}");
    }
}

fn report_directives(view: &mut TimelineView) {
    let mut directives = Vec::new();
    while let Some(directive) = view.try_next_scroll() {
        directives.push(directive_name(&directive));
    }
    println!("scroll={}", directives.join(","));
}

fn directive_name(directive: &ScrollState) -> &'static str {
    match directive {
        ScrollState::Free => "free",
        ScrollState::Bottom { .. } => "bottom",
        ScrollState::ScrollToBottom { .. } => "scroll_to_bottom",
        ScrollState::StayAtBottom { .. } => "stay_at_bottom",
        ScrollState::ScrollToView { .. } => "scroll_to_view",
        ScrollState::OffsetTop { .. } => "offset_top",
        ScrollState::ScrollTop { .. } => "scroll_top",
    }
}

fn init_outcome_name(outcome: InitOutcome) -> &'static str {
    match outcome {
        InitOutcome::Rendered => "rendered",
        InitOutcome::Empty => "empty",
        InitOutcome::WaitingForNetwork => "waiting_for_network",
        InitOutcome::Discarded => "discarded",
    }
}

fn jump_outcome_name(outcome: JumpOutcome) -> &'static str {
    match outcome {
        JumpOutcome::Scrolled => "scrolled",
        JumpOutcome::Reloaded(_) => "reloaded",
        JumpOutcome::Unbound => "unbound",
    }
}
