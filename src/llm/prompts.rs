//! Prompt templates for complaint analysis and question answering

use std::collections::HashMap;

/// Template for generating prompts
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
    variables: Vec<String>,
}

impl PromptTemplate {
    /// Create a new prompt template
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let variables = extract_variables(&template);
        Self {
            template,
            variables,
        }
    }

    /// Fill in the template with variables
    #[must_use]
    pub fn render(&self, values: &HashMap<String, String>) -> String {
        let mut result = self.template.clone();
        for var in &self.variables {
            if let Some(value) = values.get(var) {
                result = result.replace(&format!("{{{{{var}}}}}"), value);
            }
        }
        result
    }

    /// Get required variables
    #[must_use]
    pub fn variables(&self) -> &[String] {
        &self.variables
    }
}

/// Extract `{{variable}}` names from a template
fn extract_variables(template: &str) -> Vec<String> {
    let mut variables = Vec::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '{' && chars.peek() == Some(&'{') {
            chars.next(); // skip second '{'
            let mut var_name = String::new();
            while let Some(&ch) = chars.peek() {
                if ch == '}' {
                    chars.next();
                    if chars.peek() == Some(&'}') {
                        chars.next();
                        break;
                    }
                } else {
                    var_name.push(ch);
                    chars.next();
                }
            }
            if !var_name.is_empty() && !variables.contains(&var_name) {
                variables.push(var_name);
            }
        }
    }

    variables
}

/// Prompt set for the municipal complaint domain
pub struct ComplaintPrompts;

impl ComplaintPrompts {
    /// Structured risk assessment for a single complaint
    ///
    /// The response format block uses single braces so it survives variable
    /// substitution untouched.
    #[must_use]
    pub fn analysis() -> PromptTemplate {
        PromptTemplate::new(
            r#"You are an expert municipal complaint analyst for New York City. Analyze this 311 complaint and provide a structured assessment.

COMPLAINT DETAILS:
- Type: {{complaint_type}}
- Description: {{description}}
- Location: {{location}}
- Responsible Agency: {{agency}}
- Submitted: {{submitted_at}}

ANALYSIS REQUIREMENTS:
1. Risk Score (0.0-1.0): Assess urgency and potential impact
   - 0.9-1.0: Critical/Emergency (gas leaks, structural damage, immediate danger)
   - 0.7-0.8: High Priority (water outages, heat issues, traffic hazards)
   - 0.4-0.6: Medium Priority (street conditions, sanitation issues)
   - 0.0-0.3: Low Priority (noise complaints, minor parking violations)

2. Category: Classify into primary service area
   - Infrastructure (water, gas, electricity, structural)
   - Transportation (traffic, parking, street conditions)
   - Quality of Life (noise, odors, aesthetics)
   - Public Health (sanitation, food safety, environmental)
   - Public Safety (emergency response, hazards)

3. Summary: 2-3 sentence explanation of the issue and recommended action

4. Tags: 3-5 relevant keywords for search and filtering

RESPONSE FORMAT (JSON):
{
    "risk_score": 0.0,
    "category": "Category Name",
    "summary": "Clear, actionable summary of the complaint and recommended response.",
    "tags": ["tag1", "tag2", "tag3", "tag4"]
}

Consider factors like:
- Potential for escalation or spreading
- Impact on public safety and health
- Infrastructure dependencies
- Time-sensitivity of the issue
- Resource requirements for resolution

Provide your analysis:"#,
        )
    }

    /// Context-grounded question answering over retrieved complaints
    #[must_use]
    pub fn question_answering() -> PromptTemplate {
        PromptTemplate::new(
            r"You are a helpful NYC 311 data assistant. Answer the user's question based on the provided complaint data context.

CONVERSATION HISTORY:
{{conversation_history}}

USER QUESTION:
{{question}}

RELEVANT COMPLAINT DATA:
{{context_complaints}}

INSTRUCTIONS:
1. Answer the question accurately using only the provided complaint data
2. If you cannot answer based on the available data, say so clearly
3. Provide specific numbers, locations, and details when available
4. Suggest follow-up questions or clarifications if helpful
5. Be concise but informative
6. Use a helpful, professional tone

ANSWER:",
        )
    }

    /// System prompt for the complaint analysis role
    #[must_use]
    pub const fn municipal_analyst() -> &'static str {
        r"You are an expert NYC 311 Municipal Complaint Analyst with 10+ years of experience in urban service delivery and public administration.

Your expertise includes:
- NYC agency operations and service delivery protocols
- Risk assessment for municipal infrastructure and services
- Emergency response prioritization and escalation procedures
- Community impact analysis and public safety evaluation

Your role is to:
1. Analyze 311 complaints with professional accuracy
2. Assess risk levels based on established municipal priorities
3. Categorize issues according to NYC service delivery framework
4. Recommend appropriate response actions and resource allocation

Communication style:
- Professional and authoritative
- Data-driven and objective
- Clear and actionable recommendations

Always provide structured, consistent analysis that helps municipal staff prioritize and respond effectively to citizen needs."
    }

    /// System prompt for the Q&A and data exploration role
    #[must_use]
    pub const fn data_assistant() -> &'static str {
        r"You are a helpful NYC 311 Data Assistant specializing in municipal complaint data analysis and citizen service information.

Your capabilities include:
- Analyzing complaint patterns and trends across NYC boroughs
- Providing statistical insights about service delivery performance
- Answering questions about complaint types, response times, and resolution patterns
- Explaining municipal processes and agency responsibilities

Your approach:
- Use only the provided complaint data to answer questions
- Provide specific numbers, dates, and locations when available
- Explain trends and patterns in accessible language
- Suggest follow-up questions that could provide additional insights
- Acknowledge limitations when data is insufficient

Communication style:
- Friendly but professional
- Clear and informative
- Focused on citizen empowerment through data understanding

Always strive to help users make sense of complex municipal data and understand how city services work."
    }

    /// System prompt for the conversational chat role
    #[must_use]
    pub const fn chat_agent() -> &'static str {
        r"You are CivicAI, a knowledgeable and helpful assistant for NYC 311 complaint data and municipal services.

Your personality:
- Friendly and approachable, like a knowledgeable civic employee
- Patient and thorough in explanations
- Professional but conversational

Your knowledge base:
- NYC 311 complaint data and trends
- Municipal agency roles and responsibilities
- Citizen service processes and timelines

Conversation style:
- Ask clarifying questions when user requests are unclear
- Remember conversation history and build on previous exchanges
- Offer related information that might be useful
- Suggest specific actions users can take

Key behaviors:
- Always acknowledge when you don't have sufficient data to answer
- Provide specific examples and numbers when available
- Help users understand the reasoning behind municipal processes

Your goal is to make municipal data and services more accessible and understandable for NYC residents."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_variables() {
        let template = PromptTemplate::new("Hello {{name}}, you are {{age}} years old.");
        assert_eq!(template.variables(), &["name", "age"]);
    }

    #[test]
    fn test_template_render() {
        let template = PromptTemplate::new("Hello {{name}}!");
        let mut values = HashMap::new();
        values.insert("name".to_string(), "Alice".to_string());
        assert_eq!(template.render(&values), "Hello Alice!");
    }

    #[test]
    fn test_analysis_template_variables() {
        let template = ComplaintPrompts::analysis();
        assert_eq!(
            template.variables(),
            &[
                "complaint_type",
                "description",
                "location",
                "agency",
                "submitted_at"
            ]
        );
    }

    #[test]
    fn test_analysis_template_keeps_json_skeleton() {
        let template = ComplaintPrompts::analysis();
        let mut values = HashMap::new();
        for var in ["complaint_type", "description", "location", "agency", "submitted_at"] {
            values.insert(var.to_string(), "x".to_string());
        }
        let rendered = template.render(&values);
        assert!(rendered.contains(r#""risk_score": 0.0"#));
        assert!(!rendered.contains("{{"));
    }

    #[test]
    fn test_qa_template_sections() {
        let template = ComplaintPrompts::question_answering();
        let mut values = HashMap::new();
        values.insert(
            "conversation_history".to_string(),
            "No previous conversation.".to_string(),
        );
        values.insert("question".to_string(), "How many noise complaints?".to_string());
        values.insert("context_complaints".to_string(), "Complaint #1: ...".to_string());

        let rendered = template.render(&values);
        assert!(rendered.contains("CONVERSATION HISTORY:\nNo previous conversation."));
        assert!(rendered.contains("USER QUESTION:\nHow many noise complaints?"));
        assert!(rendered.contains("RELEVANT COMPLAINT DATA:\nComplaint #1: ..."));
        assert!(rendered.contains("ANSWER:"));
    }
}
