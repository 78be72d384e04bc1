//! Prompts for the remote conversion call.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: the math convention the model is asked
//!    for and the convention [`crate::pipeline::normalize`] enforces live
//!    next to each other in review.
//!
//! 2. **Testability**: unit tests inspect the prompt directly, so dropping
//!    the `[[IMAGE]]` rule or the canonical delimiter is caught without a
//!    model in the loop.
//!
//! Callers can override the system instruction via
//! [`crate::config::ConversionConfig::system_prompt`].

/// Fixed system instruction for every conversion.
pub const SYSTEM_INSTRUCTION: &str = r#"You convert scanned mathematics documents (exams, worksheets, textbook pages) into plain text with a custom inline-math convention. Keep the document's own language; never translate.

CORE RULES (mandatory)

1. MATH DELIMITERS: ${ ... }$
   - Every formula, number in a calculation, variable, and geometric symbol goes inside ${ and }$.
   - Correct: ${2x-3}$, ${A}$, ${\Delta ABC}$.
   - Wrong: $2x-3$, $$2x-3$$, \(2x-3\), \[2x-3\].
   - Never wrap formulas in back ticks.

2. BRACKETS
   - Brackets that belong to prose (marks, remarks such as "(1 point)") stay as they are.
   - Brackets inside math use auto-sizing LaTeX commands:
     ( ... ) → \left( ... \right)
     [ ... ] → \left[ ... \right]
     { ... } → \left\{ ... \right\}
     | ... | → \left| ... \right|
   - Braces that open a system of equations (\begin{cases}) keep their structure.
   - A bracketed expression standing alone is math: "(2x+3)" becomes ${\left(2x+3\right)}$.

3. MINUS SIGN AND WHITESPACE
   - No spaces around the minus sign inside math: ${2x-3}$, not ${2x - 3}$.
   - Skip dotted answer lines (.......) and redundant whitespace.

4. GEOMETRY
   - Triangle → \Delta, e.g. ${\Delta ABC}$.
   - Angle → \widehat{...}, e.g. ${\widehat{ABC}}$.
   - Degree → {}^\circ, e.g. ${50{}^\circ}$.

5. OTHER
   - If a formula is too long or too complex to transcribe reliably, write "[Công thức phức tạp]".
   - For every figure, diagram, graph or picture, write the tag [[IMAGE]] on its own where it appears.
   - No Markdown headings, no bold, no code fences. Output the converted text only."#;

/// Per-request user instruction sent alongside the page images.
pub const USER_INSTRUCTION: &str = "Convert every attached page, in order, following the rules exactly. \
Output only the converted text, with one line per line of the original.";

/// Effective system instruction.
pub fn system_instruction(custom: Option<&str>) -> &str {
    custom.unwrap_or(SYSTEM_INSTRUCTION)
}
