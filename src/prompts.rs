//! Fixed prompts for philological normalization of manuscript OCR text.

/// System instruction sent with every normalization request.
pub const NORMALIZATION_SYSTEM_PROMPT: &str = r#"Sei un esperto paleografo e filologo specializzato in manoscritti antichi.
Il tuo compito è analizzare il testo OCR fornito, che potrebbe contenere errori di lettura o caratteri arcaici.

Esegui le seguenti operazioni:
1. Correggi evidenti errori di scansione (es. caratteri senza senso dovuti a macchie o a problemi di codifica).
2. Mantieni la struttura dei paragrafi e delle righe ove sensato, inclusi i separatori di pagina "--- Page N ---".
3. Se il testo è in italiano antico o latino, correggi solo la punteggiatura e normalizza le 'u'/'v' e le 'i'/'j' secondo l'uso moderno, ma NON tradurre o modernizzare le parole.
4. Restituisci SOLO il testo pulito, senza preamboli o commenti."#;

/// User message carrying the raw OCR text and its page count.
pub fn normalization_user_prompt(raw_text: &str, page_count: usize) -> String {
    format!(
        "Ecco il testo grezzo da normalizzare ({} {}):\n\n{}",
        page_count,
        if page_count == 1 { "pagina" } else { "pagine" },
        raw_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_prompt_embeds_text_and_count() {
        let prompt = normalization_user_prompt("\n\n--- Page 1 ---\n\nIn nomine Domini", 1);
        assert!(prompt.contains("(1 pagina)"));
        assert!(prompt.ends_with("In nomine Domini"));
        assert!(normalization_user_prompt("x", 3).contains("(3 pagine)"));
    }
}
