//! Assistant Tools
//!
//! Declarations and handlers for the data queries the voice assistant can
//! request while a conversation is running. Handlers are plain functions over
//! the read-only [`RecordStore`]: in-memory filters only, no I/O.

use crate::records::RecordStore;
use chrono::NaiveDate;
use serde_json::{Map, Value, json};

/// Result payload returned by a tool handler.
pub type ToolResult = Map<String, Value>;

/// Signature shared by every tool handler.
///
/// `today` is the caller's current calendar day, passed in so handlers stay
/// deterministic.
pub type ToolHandler = fn(&dyn RecordStore, &Map<String, Value>, NaiveDate) -> ToolResult;

pub const OPERATING_DIVER_COUNT: &str = "getOperatingDiverCount";
pub const DIVER_LOG_STATUS: &str = "getDiverLogStatus";

/// A tool the remote model may call: its public declaration plus the local handler.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    /// Parameter schema in the Gemini function-declaration dialect.
    pub parameters: Value,
    pub handler: ToolHandler,
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Returns the tools offered to the assistant.
pub fn builtin_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: OPERATING_DIVER_COUNT,
            description: "Obtiene el número de buzos que están actualmente activos o buceando.",
            parameters: json!({ "type": "OBJECT", "properties": {} }),
            handler: operating_diver_count,
        },
        ToolDefinition {
            name: DIVER_LOG_STATUS,
            description: "Verifica el estado de la bitácora de un buzo específico para el día de hoy.",
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "diverName": {
                        "type": "STRING",
                        "description": "El nombre del buzo a consultar."
                    }
                },
                "required": ["diverName"]
            }),
            handler: diver_log_status,
        },
    ]
}

fn result(key: &str, value: Value) -> ToolResult {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

/// Counts divers whose status is active or diving.
pub fn operating_diver_count(
    store: &dyn RecordStore,
    _args: &Map<String, Value>,
    _today: NaiveDate,
) -> ToolResult {
    let count = store
        .divers()
        .iter()
        .filter(|d| d.status.is_operating())
        .count();
    result("count", json!(count))
}

/// Reports whether the named diver has a log entry for today.
///
/// The diver is matched by case-insensitive substring on the name. The most
/// recent log naming the diver as participant or supervisor decides the answer.
pub fn diver_log_status(
    store: &dyn RecordStore,
    args: &Map<String, Value>,
    today: NaiveDate,
) -> ToolResult {
    let query = args
        .get("diverName")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if query.is_empty() {
        return result(
            "status",
            json!("Por favor, especifica el nombre del buzo."),
        );
    }

    let needle = query.to_lowercase();
    let Some(diver) = store
        .divers()
        .iter()
        .find(|d| d.name.to_lowercase().contains(&needle))
    else {
        return result(
            "status",
            json!(format!("No se encontró al buzo llamado {}.", query)),
        );
    };

    let latest = store
        .dive_logs()
        .iter()
        .filter(|log| log.involves(&diver.name))
        .max_by_key(|log| log.date);

    let status = match latest {
        Some(log) if log.date >= today => format!(
            "Sí, {} registró una bitácora hoy. No hay un estado de \"aprobación\" en el sistema, pero está registrada.",
            diver.name
        ),
        Some(log) => format!(
            "La última bitácora de {} fue el {}. No hay registro para hoy.",
            diver.name,
            log.date.format("%d/%m/%Y")
        ),
        None => format!("No se encontraron bitácoras para {}.", diver.name),
    };
    result("status", json!(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{DiveLog, Diver, DiverStatus, InMemoryRecordStore};

    fn diver(id: &str, name: &str, status: DiverStatus) -> Diver {
        Diver {
            id: id.into(),
            name: name.into(),
            status,
            team: "Alfa".into(),
        }
    }

    fn log(id: &str, date: NaiveDate, supervisor: &str, divers: &[&str]) -> DiveLog {
        DiveLog {
            id: id.into(),
            date,
            location: "Talcahuano".into(),
            supervisor: supervisor.into(),
            divers: divers.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
    }

    fn args(name: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("diverName".into(), json!(name));
        map
    }

    fn status_of(result: &ToolResult) -> &str {
        result["status"].as_str().unwrap()
    }

    #[test]
    fn test_operating_count_includes_active_and_diving() {
        let store = InMemoryRecordStore::new(
            vec![
                diver("1", "Javier Castillo", DiverStatus::Active),
                diver("2", "Ana Rojas", DiverStatus::Diving),
                diver("3", "Pedro Soto", DiverStatus::Inactive),
                diver("4", "Luis Vera", DiverStatus::Inactive),
            ],
            vec![],
        );
        let result = operating_diver_count(&store, &Map::new(), today());
        assert_eq!(result["count"], json!(2));
    }

    #[test]
    fn test_log_status_reports_latest_date_when_none_today() {
        let store = InMemoryRecordStore::new(
            vec![diver("1", "Javier Castillo", DiverStatus::Active)],
            vec![
                log("a", NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), "Ana Rojas", &["Javier Castillo"]),
                log("b", NaiveDate::from_ymd_opt(2024, 6, 7).unwrap(), "Javier Castillo", &[]),
                log("c", NaiveDate::from_ymd_opt(2024, 6, 9).unwrap(), "Ana Rojas", &["Pedro Soto"]),
            ],
        );
        let result = diver_log_status(&store, &args("javier"), today());
        let status = status_of(&result);
        assert!(status.contains("07/06/2024"), "{status}");
        assert!(!status.starts_with("Sí"));
    }

    #[test]
    fn test_log_status_found_today() {
        let store = InMemoryRecordStore::new(
            vec![diver("1", "Javier Castillo", DiverStatus::Diving)],
            vec![log("a", today(), "Ana Rojas", &["Javier Castillo"])],
        );
        let result = diver_log_status(&store, &args("CASTILLO"), today());
        assert!(status_of(&result).starts_with("Sí, Javier Castillo registró una bitácora hoy."));
    }

    #[test]
    fn test_log_status_without_logs() {
        let store = InMemoryRecordStore::new(
            vec![diver("1", "Javier Castillo", DiverStatus::Active)],
            vec![],
        );
        let result = diver_log_status(&store, &args("javier"), today());
        assert_eq!(
            status_of(&result),
            "No se encontraron bitácoras para Javier Castillo."
        );
    }

    #[test]
    fn test_log_status_unknown_diver_is_a_normal_result() {
        let store = InMemoryRecordStore::default();
        let result = diver_log_status(&store, &args("Marcela"), today());
        assert_eq!(status_of(&result), "No se encontró al buzo llamado Marcela.");
    }

    #[test]
    fn test_log_status_requires_name() {
        let store = InMemoryRecordStore::default();
        let result = diver_log_status(&store, &Map::new(), today());
        assert_eq!(
            status_of(&result),
            "Por favor, especifica el nombre del buzo."
        );
        let result = diver_log_status(&store, &args("   "), today());
        assert_eq!(
            status_of(&result),
            "Por favor, especifica el nombre del buzo."
        );
    }

    #[test]
    fn test_builtin_declarations() {
        let tools = builtin_tools();
        let names: Vec<_> = tools.iter().map(|t| t.name).collect();
        assert_eq!(names, vec![OPERATING_DIVER_COUNT, DIVER_LOG_STATUS]);
        assert_eq!(tools[1].parameters["required"], json!(["diverName"]));
    }
}
