//! System prompts for the extraction and transcription calls.
//!
//! Callers can override the extraction prompt via
//! [`crate::config::ExtractionConfig::system_prompt`]; the constants here are
//! used only when no override is provided.

/// Default system prompt for turning a provider block into JSON.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You extract healthcare provider entries from one block of a printed provider directory.

Return ONLY a JSON object of this shape, with no commentary and no code fences:

{
  "providers": [
    {
      "identifier": <string or null>,      // PCP#, provider ID, NPI as printed
      "name": <string or null>,            // person's full name as printed
      "credentials": <string or null>,     // MD, DO, NP, PA-C, ...
      "specialty": <string or null>,       // primary clinical focus
      "practice_name": <string or null>,   // clinic, group or organization
      "address_line1": <string or null>,
      "address_line2": <string or null>,   // suite, floor, building
      "city": <string or null>,
      "state": <string or null>,           // two-letter code
      "zip": <string or null>,
      "county": <string or null>,
      "phone": <string or null>,
      "telehealth": <boolean or null>,
      "telehealth_details": <string or null>,
      "languages": <string or null>        // semicolon-separated
    }
  ]
}

Rules:
1. One entry per provider. A provider listed at several locations gets one entry per location.
2. Use null for anything not printed. Never invent values.
3. Organization names (Center, Clinic, Group, Hospital, Health, Medical, SC, Inc, ...) go in practice_name, never in name.
4. If the block lists an organization with no individual provider, return one entry with "name": null and the organization's address and phone.
5. Ignore page headers, footers, legends and disclaimers.
6. If the block contains no provider, return {"providers": []}."#;

/// System prompt for [`crate::config::ParserKind::Vision`] page transcription.
pub const TRANSCRIPTION_SYSTEM_PROMPT: &str = r#"You transcribe one page image of a printed healthcare provider directory into plain text.

1. Read multi-column pages column by column, top to bottom, left column first.
2. Keep every provider entry contiguous: name line first, then its identifier, address, phone, languages and notes.
3. Put each provider name on its own line. Keep organization names on their own line.
4. Render section headings (county, specialty) as Markdown headings, e.g. `## LOS ANGELES COUNTY` and `#### Family Practice`.
5. Drop page numbers, running headers and footers.
6. Output ONLY the transcribed text. No commentary, no code fences."#;

/// User message for one extraction call.
///
/// The page-level county and specialty, when known, are given as hints so
/// the model can fill them for entries that do not repeat them.
pub fn extraction_user_message(block: &str, county: Option<&str>, specialty: Option<&str>) -> String {
    let mut msg = String::new();
    if let Some(c) = county {
        msg.push_str(&format!("County heading: {c}\n"));
    }
    if let Some(s) = specialty {
        msg.push_str(&format!("Specialty heading: {s}\n"));
    }
    if !msg.is_empty() {
        msg.push('\n');
    }
    msg.push_str("Directory block:\n\"\"\"\n");
    msg.push_str(block);
    msg.push_str("\n\"\"\"");
    msg
}
