//! The closed taxonomy of downstream agents.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a downstream handler.
///
/// Routing output is parsed into this enum, so an identifier the registry
/// cannot know about is rejected before a decision is ever stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Logs every event; always selected
    Monitoring,

    /// Weather disruptions: wind, fog, storms, METAR/SIGMET issues
    WeatherAgent,

    /// Crew legality, duty time, rest, shortages
    CrewAgent,

    /// Bomb threats and security incidents
    BombThreatAgent,

    /// Runway closures, congestion, ATC flow programs
    TrafficAgent,

    /// Mechanical failures, MEL/CDL, technical faults
    MaintenanceAgent,
}

impl AgentKind {
    /// Every agent, in taxonomy order
    pub const ALL: [AgentKind; 6] = [
        AgentKind::Monitoring,
        AgentKind::WeatherAgent,
        AgentKind::CrewAgent,
        AgentKind::BombThreatAgent,
        AgentKind::TrafficAgent,
        AgentKind::MaintenanceAgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Monitoring => "monitoring",
            AgentKind::WeatherAgent => "weather_agent",
            AgentKind::CrewAgent => "crew_agent",
            AgentKind::BombThreatAgent => "bomb_threat_agent",
            AgentKind::TrafficAgent => "traffic_agent",
            AgentKind::MaintenanceAgent => "maintenance_agent",
        }
    }

    /// One-line description used in the routing prompt
    pub fn description(&self) -> &'static str {
        match self {
            AgentKind::Monitoring => "everything else, low severity, or not enough info",
            AgentKind::WeatherAgent => {
                "weather disruptions, wind, fog, storms, crosswinds, METAR/SIGMET issues"
            }
            AgentKind::CrewAgent => "crew legality, hours, flight duty time, rest issues, crew shortage",
            AgentKind::BombThreatAgent => "bomb threats, security alerts, evacuations",
            AgentKind::TrafficAgent => {
                "runway closure, taxiway congestion, ATC flow programs, airport capacity"
            }
            AgentKind::MaintenanceAgent => "mechanical failures, MEL/CDL, technical faults",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "monitoring" | "monitoring_agent" => Ok(AgentKind::Monitoring),
            "weather_agent" | "weather" => Ok(AgentKind::WeatherAgent),
            "crew_agent" | "crew" => Ok(AgentKind::CrewAgent),
            "bomb_threat_agent" | "bomb_threat" | "threat_agent" => Ok(AgentKind::BombThreatAgent),
            "traffic_agent" | "traffic" => Ok(AgentKind::TrafficAgent),
            "maintenance_agent" | "maintenance" => Ok(AgentKind::MaintenanceAgent),
            _ => Err(format!("unknown agent: {}", s)),
        }
    }
}
