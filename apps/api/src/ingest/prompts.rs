// Standardizer prompt templates.

pub const STANDARDIZE_SYSTEM: &str = "\
You are a precise resume data extractor. \
Convert raw resume text into a fixed JSON schema. \
You MUST respond with valid JSON only, no markdown fences, no explanations.";

pub const STANDARDIZE_PROMPT: &str = r#"Convert the following resume into a structured JSON object.

RESUME TEXT:
{resume_text}

HYPERLINKS FOUND IN THE DOCUMENT:
{links}

OUTPUT SCHEMA (return exactly this structure):
{
  "name": "string (the candidate's full name)",
  "email": "string" | null,
  "phone": "string" | null,
  "location": "string" | null,
  "summary": "string" | null,
  "links": ["string"],
  "skills": ["string"],
  "experience": [
    {"title": "string", "company": "string", "duration": "string", "location": "string" | null, "highlights": ["string"]}
  ],
  "education": [
    {"institution": "string", "degree": "string", "field": "string", "duration": "string" | null}
  ],
  "certifications": ["string"]
}

RULES:
1. "name" is the person's name as written at the top of the resume, never a section title or company.
2. Copy employer names, job titles, dates and degree titles exactly as written.
3. "duration" keeps the original date range text, e.g. "Jan 2020 - Present".
4. List every distinct skill once; do not invent skills that are not mentioned.
5. Put every hyperlink above that belongs to the candidate in "links".
6. Use null or [] for anything not present.
{no_fabrication}
7. Return ONLY the JSON object."#;
