//! Prompt assembly for generation requests.
//!
//! Prompt *wording* is deliberately plain; what matters here is that every
//! prompt carries the node's title, description, and duration plus the
//! course context, and that question fingerprints are stable across
//! phrasing-preserving whitespace and case differences.

use sha2::{Digest, Sha256};

use crate::curriculum::{CourseContext, CurriculumNodeDescriptor};

/// Prompt for a node-level knowledge card.
pub fn knowledge_card_prompt(node: &CurriculumNodeDescriptor, context: &CourseContext) -> String {
    format!(
        "Course: {name} ({level}, {mode}, in {language})\n\
         Why this course: {rationale}\n\n\
         Write a knowledge card for the study unit below as a JSON object.\n\
         Unit: {title}\n\
         About: {description}\n\
         Planned duration: {minutes} minutes\n",
        name = context.name,
        level = context.level,
        mode = context.mode,
        language = context.language,
        rationale = context.rationale,
        title = node.title,
        description = node.description,
        minutes = node.estimated_minutes,
    )
}

/// Prompt for a question-scoped clarification.
pub fn clarification_prompt(
    node: &CurriculumNodeDescriptor,
    context: &CourseContext,
    question: &str,
) -> String {
    format!(
        "Course: {name} ({level}, in {language})\n\
         Study unit: {title} -- {description}\n\n\
         Answer the learner's question in plain prose.\n\
         Question: {question}\n",
        name = context.name,
        level = context.level,
        language = context.language,
        title = node.title,
        description = node.description,
    )
}

/// Stable fingerprint of a learner question.
///
/// Case and whitespace variations of the same question map to the same
/// fingerprint, so repeated asks hit the same cache row.
pub fn question_fingerprint(question: &str) -> String {
    let normalized = question
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use tutor_db::models::NodeKind;

    use super::*;

    fn node() -> CurriculumNodeDescriptor {
        CurriculumNodeDescriptor {
            id: Uuid::new_v4(),
            title: "Recursion".to_owned(),
            description: "Functions that call themselves".to_owned(),
            kind: NodeKind::Study,
            layer: 1,
            estimated_minutes: 25,
        }
    }

    fn context() -> CourseContext {
        CourseContext {
            name: "Intro to CS".to_owned(),
            rationale: "Career change".to_owned(),
            level: "beginner".to_owned(),
            mode: "self-paced".to_owned(),
            language: "English".to_owned(),
        }
    }

    #[test]
    fn knowledge_card_prompt_carries_node_and_context() {
        let prompt = knowledge_card_prompt(&node(), &context());
        assert!(prompt.contains("Recursion"));
        assert!(prompt.contains("call themselves"));
        assert!(prompt.contains("25 minutes"));
        assert!(prompt.contains("Intro to CS"));
        assert!(prompt.contains("beginner"));
    }

    #[test]
    fn fingerprint_normalizes_case_and_whitespace() {
        let a = question_fingerprint("What is  a base case?");
        let b = question_fingerprint("what is a BASE case?");
        let c = question_fingerprint("What is tail recursion?");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
