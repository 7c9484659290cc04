use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use world_gateway::{
    BlockPos, DimensionId, DimensionPos, GatewayConfig, GatewayHandle, GatewaySignal,
    InMemoryWorld, MarkerKind, MemoryStore, PersistenceAdapter, TickCoordinator, WorldAccess,
    WorldContent,
};

const SCENARIO_WORLD_ID: &str = "scenario";

#[derive(Debug)]
pub enum ScenarioError {
    Io { path: PathBuf, source: std::io::Error },
    UnsupportedFormat { path: PathBuf },
    Parse { path: PathBuf, message: String },
    InvalidScenario { message: String },
    Gateway { message: String },
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioError::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            ScenarioError::UnsupportedFormat { path } => {
                write!(f, "unsupported scenario format: {}", path.display())
            }
            ScenarioError::Parse { path, message } => {
                write!(f, "failed to parse {}: {}", path.display(), message)
            }
            ScenarioError::InvalidScenario { message } => write!(f, "invalid scenario: {message}"),
            ScenarioError::Gateway { message } => write!(f, "gateway error: {message}"),
        }
    }
}

impl std::error::Error for ScenarioError {}

fn gateway_error(err: impl fmt::Display) -> ScenarioError {
    ScenarioError::Gateway {
        message: err.to_string(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ScenarioFile {
    pub version: u32,
    pub name: String,
    /// Overrides keyed by the `WORLD_GATEWAY_*` names; the process
    /// environment is never consulted.
    #[serde(default)]
    pub config: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub loaded_dimensions: Vec<DimensionId>,
    /// Steps are single-key maps (`- tick: 5`) or bare names (`- stabilize`).
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub steps: Vec<ScenarioStep>,
    pub expect: Expectations,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Coordinate {
    pub dimension: DimensionId,
    pub at: [i32; 3],
}

fn block_pos(at: [i32; 3]) -> BlockPos {
    BlockPos::new(at[0], at[1], at[2])
}

impl Coordinate {
    fn pos(&self) -> BlockPos {
        block_pos(self.at)
    }

    fn location(&self) -> DimensionPos {
        DimensionPos::new(self.dimension.clone(), self.pos())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStep {
    Enter(Coordinate),
    PlaceMarker {
        dimension: DimensionId,
        at: [i32; 3],
        #[serde(default = "default_marker")]
        marker: MarkerKind,
    },
    PlaceBlock {
        dimension: DimensionId,
        at: [i32; 3],
        block_id: String,
    },
    /// Records the current content as the restoration snapshot, then clears it.
    BreakBlock(Coordinate),
    Stabilize,
    BossDefeated(Coordinate),
    Tick(u64),
    Load(DimensionId),
    Unload(DimensionId),
    SaveAndReload,
}

fn default_marker() -> MarkerKind {
    MarkerKind::Gateway
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockExpectation {
    pub dimension: DimensionId,
    pub at: [i32; 3],
    /// `None` expects the coordinate to be empty.
    #[serde(default)]
    pub block_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Expectations {
    #[serde(default)]
    pub entered: Option<bool>,
    #[serde(default)]
    pub stabilized: Option<bool>,
    #[serde(default)]
    pub final_event_completed: Option<bool>,
    #[serde(default)]
    pub travel_unstable: Option<bool>,
    #[serde(default)]
    pub portals: Option<usize>,
    #[serde(default)]
    pub pending_restorations: Option<usize>,
    #[serde(default)]
    pub markers: BTreeMap<String, usize>,
    #[serde(default)]
    pub blocks: Vec<BlockExpectation>,
}

#[derive(Debug)]
pub struct ScenarioOutcome {
    pub name: String,
    pub source: String,
    pub passed: bool,
    pub failures: Vec<String>,
}

struct ScenarioSession {
    config: GatewayConfig,
    store: MemoryStore,
    adapter: PersistenceAdapter,
    handle: GatewayHandle,
    coordinator: TickCoordinator,
    world: InMemoryWorld,
}

impl ScenarioSession {
    fn open(config: GatewayConfig, loaded: &[DimensionId]) -> Result<Self, ScenarioError> {
        let store = MemoryStore::new();
        let adapter = PersistenceAdapter::new(config.record_codec);
        let handle = adapter
            .get_or_create(SCENARIO_WORLD_ID, &store)
            .map_err(gateway_error)?;
        let coordinator = TickCoordinator::new(handle.clone(), config.clone());
        Ok(Self {
            config,
            store,
            adapter,
            handle,
            coordinator,
            world: InMemoryWorld::with_loaded(loaded.iter().cloned()),
        })
    }

    fn apply(&mut self, step: &ScenarioStep) -> Result<(), ScenarioError> {
        match step {
            ScenarioStep::Enter(at) => {
                let outcome = self.coordinator.handle_signal(
                    &mut self.world,
                    GatewaySignal::ParticipantEnteredDimension {
                        dimension: at.dimension.clone(),
                        position: at.pos(),
                    },
                );
                debug!(?outcome, "enter step");
            }
            ScenarioStep::PlaceMarker {
                dimension,
                at,
                marker,
            } => {
                self.world
                    .set(dimension, block_pos(*at), WorldContent::marker(*marker));
            }
            ScenarioStep::PlaceBlock {
                dimension,
                at,
                block_id,
            } => {
                self.world
                    .set(dimension, block_pos(*at), WorldContent::block(block_id.clone()));
            }
            ScenarioStep::BreakBlock(at) => {
                let snapshot = self.world.content_at(&at.dimension, at.pos());
                if snapshot.is_empty() {
                    return Err(ScenarioError::InvalidScenario {
                        message: format!("break_block on empty coordinate {}", at.location()),
                    });
                }
                self.world
                    .set(&at.dimension, at.pos(), WorldContent::Empty);
                self.coordinator.handle_signal(
                    &mut self.world,
                    GatewaySignal::SpecialBlockBroken {
                        location: at.location(),
                        snapshot,
                    },
                );
            }
            ScenarioStep::Stabilize => {
                self.coordinator
                    .handle_signal(&mut self.world, GatewaySignal::StabilizationItemUsed);
            }
            ScenarioStep::BossDefeated(at) => {
                self.coordinator.handle_signal(
                    &mut self.world,
                    GatewaySignal::FinalBossDefeated {
                        location: at.location(),
                    },
                );
            }
            ScenarioStep::Tick(count) => {
                for _ in 0..*count {
                    self.coordinator.tick(&mut self.world);
                }
            }
            ScenarioStep::Load(dimension) => self.world.load_dimension(dimension.clone()),
            ScenarioStep::Unload(dimension) => self.world.unload_dimension(dimension),
            ScenarioStep::SaveAndReload => self.save_and_reload()?,
        }
        Ok(())
    }

    /// Simulates a server restart. Pending restorations do not survive it.
    fn save_and_reload(&mut self) -> Result<(), ScenarioError> {
        let saved = self
            .adapter
            .save_if_dirty(&self.handle, &self.store)
            .map_err(gateway_error)?;
        debug!(?saved, "scenario state saved");
        self.adapter = PersistenceAdapter::new(self.config.record_codec);
        self.handle = self
            .adapter
            .get_or_create(SCENARIO_WORLD_ID, &self.store)
            .map_err(gateway_error)?;
        self.coordinator = TickCoordinator::new(self.handle.clone(), self.config.clone());
        Ok(())
    }

    fn evaluate(&self, expect: &Expectations) -> Vec<String> {
        let mut failures = Vec::new();
        let status = self.coordinator.status();

        let flags = [
            ("entered", expect.entered, status.entered),
            ("stabilized", expect.stabilized, status.stabilized),
            (
                "final_event_completed",
                expect.final_event_completed,
                status.final_event_completed,
            ),
            ("travel_unstable", expect.travel_unstable, status.travel_unstable),
        ];
        for (label, expected, actual) in flags {
            if let Some(expected) = expected {
                if expected != actual {
                    failures.push(format!("{label} mismatch: expected {expected}, got {actual}"));
                }
            }
        }

        if let Some(expected) = expect.portals {
            if status.portals != expected {
                failures.push(format!(
                    "portals mismatch: expected {expected}, got {}",
                    status.portals
                ));
            }
        }

        if let Some(expected) = expect.pending_restorations {
            if status.pending_restorations != expected {
                failures.push(format!(
                    "pending restorations mismatch: expected {expected}, got {}",
                    status.pending_restorations
                ));
            }
        }

        for (dimension, expected) in &expect.markers {
            match DimensionId::new(dimension.clone()) {
                Ok(dimension) => {
                    let actual = self.world.count_markers(&dimension);
                    if actual != *expected {
                        failures.push(format!(
                            "markers in {dimension} mismatch: expected {expected}, got {actual}"
                        ));
                    }
                }
                Err(err) => failures.push(err.to_string()),
            }
        }

        for block in &expect.blocks {
            let pos = block_pos(block.at);
            let content = self.world.content_at(&block.dimension, pos);
            let actual = match &content {
                WorldContent::Block { block_id, .. } => Some(block_id.as_str()),
                WorldContent::Empty => None,
                WorldContent::PortalMarker { marker } => Some(marker.as_str()),
            };
            if actual != block.block_id.as_deref() {
                failures.push(format!(
                    "block at {} mismatch: expected {:?}, got {:?}",
                    DimensionPos::new(block.dimension.clone(), pos),
                    block.block_id,
                    actual
                ));
            }
        }

        failures
    }
}

pub fn run_scenario_file(path: &Path) -> Result<ScenarioOutcome, ScenarioError> {
    let scenario = load_scenario_file(path)?;
    run_loaded_scenario(&scenario, path.to_string_lossy().as_ref())
}

pub fn run_loaded_scenario(
    scenario: &ScenarioFile,
    source: &str,
) -> Result<ScenarioOutcome, ScenarioError> {
    if scenario.version != 1 {
        return Err(ScenarioError::InvalidScenario {
            message: format!("unsupported version {}", scenario.version),
        });
    }

    let config = scenario_config(&scenario.config)?;
    let mut session = ScenarioSession::open(config, &scenario.loaded_dimensions)?;
    for step in &scenario.steps {
        session.apply(step)?;
    }

    let failures = session.evaluate(&scenario.expect);
    info!(
        scenario = %scenario.name,
        steps = scenario.steps.len(),
        failures = failures.len(),
        "scenario finished"
    );
    Ok(ScenarioOutcome {
        name: scenario.name.clone(),
        source: source.to_string(),
        passed: failures.is_empty(),
        failures,
    })
}

fn scenario_config(
    overrides: &BTreeMap<String, serde_yaml::Value>,
) -> Result<GatewayConfig, ScenarioError> {
    let mut values = BTreeMap::new();
    for (key, value) in overrides {
        let value = match value {
            serde_yaml::Value::String(value) => value.clone(),
            serde_yaml::Value::Number(value) => value.to_string(),
            serde_yaml::Value::Bool(value) => value.to_string(),
            _ => {
                return Err(ScenarioError::InvalidScenario {
                    message: format!("config value for {key} must be a scalar"),
                })
            }
        };
        values.insert(key.as_str(), value);
    }
    GatewayConfig::from_env_with(|key| values.get(key).cloned()).map_err(gateway_error)
}

pub fn discover_scenario_files(dir: &Path) -> Result<Vec<PathBuf>, ScenarioError> {
    let mut entries = Vec::new();
    let read_dir = std::fs::read_dir(dir).map_err(|err| ScenarioError::Io {
        path: dir.to_path_buf(),
        source: err,
    })?;

    for entry in read_dir {
        let entry = entry.map_err(|err| ScenarioError::Io {
            path: dir.to_path_buf(),
            source: err,
        })?;
        let path = entry.path();
        if path.is_file() && is_supported_format(&path) {
            entries.push(path);
        }
    }

    entries.sort();
    Ok(entries)
}

pub fn load_scenario_file(path: &Path) -> Result<ScenarioFile, ScenarioError> {
    let contents = std::fs::read_to_string(path).map_err(|err| ScenarioError::Io {
        path: path.to_path_buf(),
        source: err,
    })?;
    match extension_of(path).as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(|err| ScenarioError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
        "json" => serde_json::from_str(&contents).map_err(|err| ScenarioError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
        _ => Err(ScenarioError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|value| value.to_str())
        .unwrap_or("")
        .to_lowercase()
}

fn is_supported_format(path: &Path) -> bool {
    matches!(extension_of(path).as_str(), "yaml" | "yml" | "json")
}
