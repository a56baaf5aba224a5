//! Simulation scenarios for the Terra engine.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SIM-001: One noisy lap around a 200 m block
    SquareLoop,

    /// SIM-002: Two laps then a walk away; the loop must count once
    DoubleLap,

    /// SIM-003: Standing still under drifting fixes
    StationaryDrift,

    /// SIM-004: A lap under every receiver glitch at once
    GlitchStorm,

    /// SIM-005: A short pause spliced, a long pause breaking the path
    PauseGap,

    /// SIM-006: Two overlapping runs unioned into one territory
    TerritoryMerge,

    /// SIM-007: Boarding a vehicle mid-run
    VehicleHandoff,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SquareLoop,
            ScenarioId::DoubleLap,
            ScenarioId::StationaryDrift,
            ScenarioId::GlitchStorm,
            ScenarioId::PauseGap,
            ScenarioId::TerritoryMerge,
            ScenarioId::VehicleHandoff,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SquareLoop => "square_loop",
            ScenarioId::DoubleLap => "double_lap",
            ScenarioId::StationaryDrift => "stationary_drift",
            ScenarioId::GlitchStorm => "glitch_storm",
            ScenarioId::PauseGap => "pause_gap",
            ScenarioId::TerritoryMerge => "territory_merge",
            ScenarioId::VehicleHandoff => "vehicle_handoff",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SquareLoop => "200 m square at walking pace, closed loop within 15% of 40 000 m²",
            ScenarioId::DoubleLap => "100 m square walked twice plus a tail, area counted once",
            ScenarioId::StationaryDrift => "2 minutes standing still, path length far below raw jitter",
            ScenarioId::GlitchStorm => "Null island, teleports and bad accuracy never reach the path",
            ScenarioId::PauseGap => "20 m pause gap spliced, 150 m pause gap breaks the path",
            ScenarioId::TerritoryMerge => "Overlapping runs merge into one territory without area loss",
            ScenarioId::VehicleHandoff => "Sustained vehicle speed is eventually accepted as a mode change",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "square_loop" | "squareloop" | "sim-001" => Ok(ScenarioId::SquareLoop),
            "double_lap" | "doublelap" | "sim-002" => Ok(ScenarioId::DoubleLap),
            "stationary_drift" | "stationarydrift" | "sim-003" => Ok(ScenarioId::StationaryDrift),
            "glitch_storm" | "glitchstorm" | "sim-004" => Ok(ScenarioId::GlitchStorm),
            "pause_gap" | "pausegap" | "sim-005" => Ok(ScenarioId::PauseGap),
            "territory_merge" | "territorymerge" | "sim-006" => Ok(ScenarioId::TerritoryMerge),
            "vehicle_handoff" | "vehiclehandoff" | "sim-007" => Ok(ScenarioId::VehicleHandoff),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
