//! Embedded framework catalog.
//!
//! Used when no framework directory is configured and as the fallback when
//! the configured directory cannot be loaded.

use crate::models::Framework;

/// Name of the framework used when nothing else matches.
pub const DEFAULT_FRAMEWORK: &str = "PECRA";

/// Perspective, Experience, Context, Request, Action.
#[must_use]
pub fn pecra() -> Framework {
    Framework::builtin(
        "PECRA",
        "Perspective, Experience, Context, Request, Action framework",
        &[
            ("Perspective", "Define the role or perspective to adopt"),
            ("Experience", "Specify relevant experience or expertise"),
            ("Context", "Provide context or background information"),
            ("Request", "Clearly state what you want"),
            ("Action", "Specify the desired action or output format"),
        ],
        &[
            "role", "expert", "persona", "consult", "consultation", "write", "writing",
            "generate", "content", "create", "general",
        ],
        "Perspective: You are a senior data scientist\n\
         Experience: With 10+ years in predictive modeling\n\
         Context: Working with a retail dataset of customer purchases\n\
         Request: Analyze purchase patterns\n\
         Action: Provide actionable insights in bullet points",
    )
}

fn scqa() -> Framework {
    Framework::builtin(
        "SCQA",
        "Situation, Complication, Question, Answer framework",
        &[
            ("Situation", "Establish the current situation"),
            ("Complication", "Identify the complication or problem"),
            ("Question", "Formulate the key question to address"),
            ("Answer", "Guide towards the desired answer or output"),
        ],
        &[
            "summarize", "summary", "summarization", "executive", "business", "problem", "issue",
            "challenge", "decision", "briefing", "report",
        ],
        "Situation: Our e-commerce site has stable traffic\n\
         Complication: But conversion rates dropped 15% last month\n\
         Question: What might be causing this decrease?\n\
         Answer: Provide 3-5 potential causes and solutions",
    )
}

fn react() -> Framework {
    Framework::builtin(
        "ReAct",
        "Reasoning and Acting framework",
        &[
            ("Thought", "Think step by step about the problem"),
            ("Action", "Define what action to take based on reasoning"),
            ("Observation", "Note what is observed from the action"),
            ("Next Step", "Continue the reasoning process until the task is solved"),
        ],
        &[
            "reason", "reasoning", "think", "logic", "analyze", "analysis", "scientific",
            "science", "code", "debug", "multi-step", "deduce",
        ],
        "Thought: I need to follow order of operations\n\
         Action: First, calculate what's in the parentheses: 3 + 5 = 8\n\
         Observation: The expression is now (14 x 6) / 8\n\
         Next Step: Multiply, then divide to reach 10.5",
    )
}

fn rtf() -> Framework {
    Framework::builtin(
        "RTF",
        "Rule of Three Feedback framework",
        &[
            ("Round 1", "Initial prompt and response"),
            ("Feedback 1", "Provide specific feedback on what needs improvement"),
            ("Round 2", "Improved prompt based on feedback"),
            ("Feedback 2", "Second round of focused feedback"),
            ("Round 3", "Final optimized prompt"),
        ],
        &[
            "improve", "feedback", "iterate", "iterative", "refine", "creative", "story",
            "fiction", "poem",
        ],
        "Round 1: Write a short story about a detective\n\
         Feedback 1: Make the detective more unique and add a surprising twist\n\
         Round 2: Write a short story about a detective who can speak to buildings\n\
         Feedback 2: Make the ending more satisfying\n\
         Round 3: Write a short story about a detective who can speak to buildings, \
         with a satisfying resolution to the case",
    )
}

fn risen() -> Framework {
    Framework::builtin(
        "RISEN",
        "Role, Information, Steps, Example, Negative example framework",
        &[
            ("Role", "Clearly define the role being assigned"),
            ("Information", "Provide all necessary context and data"),
            ("Steps", "Outline specific steps to follow"),
            ("Example", "Show a positive example of desired output"),
            ("Negative Example", "Demonstrate what to avoid"),
        ],
        &[
            "technical", "documentation", "guide", "steps", "tutorial", "instructions",
            "explain", "educational", "teach", "onboarding",
        ],
        "Role: You are a technical documentation writer\n\
         Information: We're launching a new API for our payment system\n\
         Steps: 1. Explain authentication, 2. Detail each endpoint, 3. Provide code examples\n\
         Example: Here's good API documentation: [example]\n\
         Negative Example: Avoid vague descriptions like this: [counter-example]",
    )
}

/// Returns the embedded catalog, in catalog order.
#[must_use]
pub fn embedded_catalog() -> Vec<Framework> {
    vec![pecra(), scqa(), react(), rtf(), risen()]
}
