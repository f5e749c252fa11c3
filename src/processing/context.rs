//! Context assembly for grounded answers.

use crate::processing::types::RankedResult;

/// Separator placed between fragment texts in the context block.
const FRAGMENT_SEPARATOR: &str = "\n\n";

/// Fragment texts joined in ranked order.
pub fn assemble_context(results: &[RankedResult]) -> String {
    results
        .iter()
        .map(|result| result.fragment.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(FRAGMENT_SEPARATOR)
}

/// Interpolate the context block and question into the answering instructions.
pub fn build_answer_prompt(context: &str, question: &str) -> String {
    format!(
        "Responde la pregunta usando únicamente la normativa incluida en el contexto. \
Si el contexto no contiene la información necesaria, indícalo de forma explícita y no inventes \
datos. Cita el nombre de la norma cuando sea posible.\n\n\
Contexto:\n{context}\n\n\
Pregunta: {question}\n\n\
Respuesta:"
    )
}

/// Distinct source filenames in order of first appearance.
pub fn distinct_sources(results: &[RankedResult]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for result in results {
        let source = result.fragment.source.as_str();
        if !source.is_empty() && !sources.iter().any(|seen| seen == source) {
            sources.push(source.to_string());
        }
    }
    sources
}
