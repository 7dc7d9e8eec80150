// Cross-cutting prompt fragments. Each stage that calls the backend keeps its
// own prompts.rs next to it.

/// Appended to every prompt that reads or rewrites a candidate's history.
pub const NO_FABRICATION_INSTRUCTION: &str = "\
    CRITICAL: Use only facts present in the provided material. \
    Do NOT infer, interpolate, or invent employers, job titles, dates, degrees, or skills. \
    If the material does not support a value, leave it empty.";
