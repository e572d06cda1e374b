//! Dive Plan Compliance Check
//!
//! Asks the generation model to review a dive plan against the Chilean
//! professional diving regulations and classifies the answer.

use crate::llm_client::GenerationClient;
use anyhow::{Result, bail};

/// First line the model must emit when the plan complies.
pub const CONFORMING_MARKER: &str = "Plan Conforme a la Normativa";

/// Outcome of a compliance review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceReport {
    pub conforming: bool,
    pub analysis: String,
}

/// Builds the review prompt for `plan_text`.
pub fn compliance_prompt(plan_text: &str) -> String {
    format!(
        "Actúa como un supervisor experto en buceo profesional y seguridad para la Armada de Chile. \
Tu tarea es verificar si el siguiente plan de buceo cumple rigurosamente con la normativa chilena, \
incluyendo la Circular A-42/002 y el D.S. N° 752.

Analiza el plan proporcionado y genera una respuesta clara y estructurada.

1. Si el plan CUMPLE con la normativa, tu respuesta DEBE comenzar EXACTAMENTE con la línea: \"{CONFORMING_MARKER}\".
2. A continuación, proporciona una explicación detallada de por qué cumple. Desglosa los puntos clave de \
cumplimiento (como personal, equipo, parámetros de buceo, plan de emergencia) y utiliza **negrita** \
(con dobles asteriscos) para resaltar los elementos más importantes.

Aquí está el plan de buceo para analizar:
---
{plan_text}
---"
    )
}

/// Reviews `plan_text` with the given client.
pub async fn verify_plan(client: &dyn GenerationClient, plan_text: &str) -> Result<ComplianceReport> {
    let plan_text = plan_text.trim();
    if plan_text.is_empty() {
        bail!("El plan de buceo no puede estar vacío.");
    }

    let analysis = client.generate_text(&compliance_prompt(plan_text)).await?;
    let conforming = analysis.trim_start().starts_with(CONFORMING_MARKER);
    tracing::info!(conforming, chars = analysis.len(), "Plan compliance review finished");
    Ok(ComplianceReport {
        conforming,
        analysis,
    })
}
