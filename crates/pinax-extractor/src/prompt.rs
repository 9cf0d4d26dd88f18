use pinax_types::{ContextBundle, DCMI_TYPES};

const SCHEMA_BLOCK: &str = r#"Emit exactly one JSON object with these fields:
Required:
  id            - ULID or UUID (leave absent if unknown; one will be generated)
  title         - string
  type          - one of the DCMI Type values listed above
  creator       - string, or non-empty list of strings
  institution   - string
  created       - "YYYY" or "YYYY-MM-DD"
  access_url    - http(s) URL
Optional:
  language      - BCP-47 language tag
  subjects      - list of strings
  description   - string
  source        - string
  rights        - string
  place         - string, or list of strings
Respond with the JSON object only."#;

/// Builds the system prompt: the fixed schema, the DCMI vocabulary, the
/// collection-first heuristics, and any caller-supplied prompt appended
/// verbatim — mirroring the header/body/footer shape of a wrapped prompt,
/// just assembled in one pass since there is no policy-guardrail layer here.
pub fn build_system_prompt(custom_prompt: Option<&str>) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are an archival cataloguer. You synthesize a single PINAX metadata \
         record (a Dublin-Core-derived schema) describing one entity from its \
         associated files.\n\n",
    );
    prompt.push_str("DCMI Type vocabulary (type must be exactly one of these):\n");
    for t in DCMI_TYPES {
        prompt.push_str("  - ");
        prompt.push_str(t);
        prompt.push('\n');
    }
    prompt.push('\n');
    prompt.push_str(SCHEMA_BLOCK);
    prompt.push_str(
        "\n\nCollection-first heuristics:\n\
         - When more than one file is present, default type to \"Collection\" \
         unless the files clearly describe a single resource of another type.\n\
         - Synthesize a collection-level title; do not just reuse one file's title.\n\
         - Aggregate subjects, creators, and places across all files rather than \
         picking one file's values.\n\
         - Treat any \"child_pinax_*.json\" file as a sub-collection signal: its \
         title, subjects, and creators should inform the parent record, not be \
         copied verbatim.\n",
    );

    if let Some(custom) = custom_prompt {
        prompt.push_str("\n");
        prompt.push_str(custom);
    }

    prompt
}

/// Builds the user prompt: directory name, each file rendered as a fenced
/// section, then the schema block repeated so it stays close to the
/// response the model is about to produce.
pub fn build_user_prompt(bundle: &ContextBundle) -> String {
    let mut prompt = String::new();
    prompt.push_str("Directory: ");
    prompt.push_str(&bundle.directory_name);
    prompt.push_str("\n\n");

    for file in &bundle.files {
        prompt.push_str("--- File: ");
        prompt.push_str(&file.name);
        prompt.push_str(" ---\n");
        prompt.push_str(&file.content);
        prompt.push('\n');
    }

    prompt.push('\n');
    prompt.push_str(SCHEMA_BLOCK);
    prompt
}
