//! Scripted journeys for DST.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SP-001: Traveller keeps pace and reaches every checkpoint
    OnSchedule,

    /// SP-002: Traveller stops short of the first checkpoint
    Stalled,

    /// SP-003: Stalled, but the user answers every countdown with "I'm safe"
    ImSafe,

    /// SP-004: Stalled with an empty contact book
    NoContacts,

    /// SP-005: SOS button pressed mid-journey
    SosButton,

    /// SP-006: SMS gateway down for the first misses, then back
    SenderOutage,

    /// SP-007: Location permission refused
    PermissionDenied,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::OnSchedule,
            ScenarioId::Stalled,
            ScenarioId::ImSafe,
            ScenarioId::NoContacts,
            ScenarioId::SosButton,
            ScenarioId::SenderOutage,
            ScenarioId::PermissionDenied,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::OnSchedule => "on_schedule",
            ScenarioId::Stalled => "stalled",
            ScenarioId::ImSafe => "im_safe",
            ScenarioId::NoContacts => "no_contacts",
            ScenarioId::SosButton => "sos_button",
            ScenarioId::SenderOutage => "sender_outage",
            ScenarioId::PermissionDenied => "permission_denied",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::OnSchedule => "45 km/h against a 40 km/h budget: every checkpoint reached, no alert",
            ScenarioId::Stalled => "Stops after 1.5 km: every checkpoint missed, alerts delivered",
            ScenarioId::ImSafe => "Stalled, each countdown cancelled after 10 s: nothing sent",
            ScenarioId::NoContacts => "Stalled with no reachable contact: escalation rejected, nothing sent",
            ScenarioId::SosButton => "SOS at t=60 s: exactly one alert 3 s later, journey unaffected",
            ScenarioId::SenderOutage => "Gateway down until t=450 s: failures surfaced, later alert delivered",
            ScenarioId::PermissionDenied => "Location refused: errors surfaced, no evaluation, no alert",
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
            "on_schedule" | "onschedule" | "sp-001" => Ok(ScenarioId::OnSchedule),
            "stalled" | "sp-002" => Ok(ScenarioId::Stalled),
            "im_safe" | "imsafe" | "sp-003" => Ok(ScenarioId::ImSafe),
            "no_contacts" | "nocontacts" | "sp-004" => Ok(ScenarioId::NoContacts),
            "sos_button" | "sos" | "sp-005" => Ok(ScenarioId::SosButton),
            "sender_outage" | "outage" | "sp-006" => Ok(ScenarioId::SenderOutage),
            "permission_denied" | "denied" | "sp-007" => Ok(ScenarioId::PermissionDenied),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
            assert!(!scenario.description().is_empty());
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!("SP-005".parse::<ScenarioId>(), Ok(ScenarioId::SosButton));
        assert_eq!("ImSafe".parse::<ScenarioId>(), Ok(ScenarioId::ImSafe));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
