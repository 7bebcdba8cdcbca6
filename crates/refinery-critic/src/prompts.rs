/// Prompt composition for the generator and refiner
pub struct LoopPrompts;

impl LoopPrompts {
    /// Prompt sent to the generator for the initial draft
    pub fn generation_prompt(user_prompt: &str) -> String {
        format!("User prompt: {}", user_prompt)
    }

    /// Prompt sent to the refiner; both inputs are embedded verbatim
    pub fn refinement_prompt(text: &str, critique: &str) -> String {
        format!(
            "Original text:\n{text}\n\nCritique:\n{critique}\n\nRefine the original text based on the critique."
        )
    }

    /// Join per-role critiques in role order, separated by a blank line
    pub fn combine_critiques<S: AsRef<str>>(critiques: &[S]) -> String {
        critiques
            .iter()
            .map(|c| c.as_ref())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refinement_prompt_embeds_both_inputs() {
        let prompt = LoopPrompts::refinement_prompt("draft v0", "fix X");
        assert_eq!(
            prompt,
            "Original text:\ndraft v0\n\nCritique:\nfix X\n\nRefine the original text based on the critique."
        );
    }

    #[test]
    fn test_combine_keeps_order_and_empty_parts() {
        let combined = LoopPrompts::combine_critiques(&["A says", "", "C says"]);
        assert_eq!(combined, "A says\n\n\n\nC says");
        assert_eq!(LoopPrompts::generation_prompt("haiku"), "User prompt: haiku");
    }
}
