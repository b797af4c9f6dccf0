use shared::protocol::DiagnosisResponse;

const DEFAULT_TITLE: &str = "Diagnosis";
const DEFAULT_DISEASE: &str = "Unknown";

/// Renders a diagnosis as the transcript text shown to the user.
pub fn render_diagnosis(diagnosis: &DiagnosisResponse) -> String {
    let title = diagnosis.title.as_deref().unwrap_or(DEFAULT_TITLE);
    let disease = diagnosis
        .predicted_disease
        .as_deref()
        .unwrap_or(DEFAULT_DISEASE);

    let mut summary = format!(
        "\n{title}\n\nDisease: {disease}\nConfidence: {}%\n\nNext steps:",
        confidence_percent(diagnosis.confidence)
    );
    for step in &diagnosis.recommendations {
        summary.push_str("\n- ");
        summary.push_str(step);
    }
    summary
}

/// Fraction in 0..1 to a whole percentage, half away from zero.
fn confidence_percent(confidence: Option<f64>) -> i64 {
    // `as` saturates and maps NaN to 0.
    (confidence.unwrap_or(0.0) * 100.0).round() as i64
}
