use serde::{Deserialize, Serialize};

/// Avance parcial de una tarea, reportado por el worker mientras trabaja.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub label: String,
    /// Filas procesadas hasta ahora
    pub processed: u64,
    /// Total conocido (si el handler lo sabe)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// Resultado terminal de una tarea. Exactamente uno por tarea despachada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub label: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    pub fn ok(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(label: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}
