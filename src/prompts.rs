//! Prompts sent to the remote model.
//!
//! Kept in one place so a prompt change never touches retry or pipeline
//! code, and so tests can inspect the exact text that goes over the wire.
//! Callers can override the analysis system prompt via
//! [`crate::config::PipelineConfig::system_prompt`].

/// System instruction framing the model as a clinical analyst.
pub const CLINICAL_ANALYST_PROMPT: &str = r#"You are an experienced clinical analyst reviewing OCR-extracted text from medical documents (lab reports, prescriptions, discharge summaries, imaging reports).

Rules:
- Work only from the text provided. Never invent values, dates or diagnoses.
- OCR text may contain recognition errors. Flag values that look garbled instead of guessing.
- Quote every numeric result with its unit and reference range when present.
- Mark each result as NORMAL, HIGH, LOW or UNCLEAR relative to its reference range.
- Use plain language a patient can follow, and keep medical terms in parentheses.
- End with a reminder that this summary does not replace a consultation with a qualified clinician."#;

/// Instruction for the remote vision OCR backend.
pub const TRANSCRIPTION_PROMPT: &str = "Transcribe all text visible in this image exactly as written, preserving line breaks and table rows. Output only the transcribed text, with no commentary. If the image contains no text, output nothing.";

/// Build the fixed-structure analysis request around the aggregate text.
///
/// The whole text is embedded verbatim; it is never truncated or chunked.
pub fn analysis_prompt(aggregate_text: &str) -> String {
    format!(
        "Analyse the following medical document text and produce a report with these sections:\n\
         \n\
         1. DOCUMENT OVERVIEW: document types, dates, issuing facility and patient details present in the text.\n\
         2. KEY FINDINGS: every test result or observation with value, unit, reference range and status.\n\
         3. ABNORMAL VALUES: the results outside their reference ranges and what they commonly indicate.\n\
         4. MEDICATIONS: drugs, doses and schedules mentioned, if any.\n\
         5. RECOMMENDATIONS: follow-up questions for the treating clinician.\n\
         \n\
         Document text:\n\
         \"\"\"\n\
         {aggregate_text}\n\
         \"\"\""
    )
}
