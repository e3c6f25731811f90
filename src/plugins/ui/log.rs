//! Log panel update system.

use bevy::prelude::*;

use crate::plugins::core::EventLog;

use super::components::LogContentText;

pub fn log_body(log: &EventLog) -> String {
    if log.entries().is_empty() {
        return "No events yet".to_string();
    }
    log.entries()
        .iter()
        .map(|entry| format!("> {}", entry))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn update_log_panel(log: Res<EventLog>, mut log_text: Query<&mut Text, With<LogContentText>>) {
    if !log.is_changed() {
        return;
    }
    if let Some(mut text) = log_text.iter_mut().next() {
        text.0 = log_body(&log);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_body_lists_entries_in_order() {
        let mut log = EventLog::default();
        assert_eq!(log_body(&log), "No events yet");

        log.push("Scan received".to_string());
        log.push("Waypoint 1: SOL".to_string());
        assert_eq!(log_body(&log), "> Scan received\n> Waypoint 1: SOL");
    }
}
