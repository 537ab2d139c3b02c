use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::traits::Tool;

/// Guidelines for generating TypeScript code steps in Flowhub flows.
/// Static text with context-specific addenda.
pub struct CodeGuidelinesTool;

const BASE_GUIDELINES: &str = r#"=== FLOWHUB CODE STEP GUIDELINES ===

CORE CONCEPT:
You are generating code for a SINGLE STEP in an automation flow, NOT a backend service.
This code will run as ONE step in a larger flow where:
- Previous steps provide inputs
- Next steps will use the outputs
- Authentication is handled by flow connections
- Each step should do ONE thing well

CRITICAL REQUIREMENTS:

1. FUNCTION STRUCTURE:
   - MUST start with 'export const code ='
   - MUST be an async function
   - MUST have proper input parameters with TypeScript types
   - MUST return a value for next steps to use
   - Keep it simple - this is one step in a flow!

2. HTTP REQUESTS:
   - Use native fetch API (built-in)
   - NO external HTTP libraries needed (no axios, request, etc.)
   - Always check response.ok before processing

   Example:
   ```typescript
   const response = await fetch(url, {
     method: 'POST',
     headers: { 'Content-Type': 'application/json' },
     body: JSON.stringify(data)
   });

   if (!response.ok) {
     throw new Error(`API error: ${response.statusText}`);
   }

   return await response.json();
   ```

3. INPUT PARAMETERS:
   - Inputs come from previous steps or flow connections
   - Expect tokens/credentials from flow connections
   - NO OAuth flows or token generation in code
   - NO client IDs or secrets in code
   - NO environment variables
   - For non-string literal values, wrap in {{ }}:
     - Numbers: {{ 500 }}
     - Arrays: {{ [1,2,3,4] }}
     - Objects: {{ {"key": "value"} }}

4. FLOW INTEGRATION:
   - Return data that next steps can use
   - Keep processing focused on one task
   - Let the flow orchestrate complex processes
   - Think: "What does the NEXT step need from this step?"

5. TITLE GUIDELINES:
   - Title should be 2-4 words, action-oriented (verb + noun)
   - Examples: "Send Email", "Query Database", "Transform JSON",
     "Fetch User Data", "Calculate Total", "Filter Records"

OUTPUT FORMAT:

Always wrap your response in markdown code blocks for proper display.

For JSON responses, use:
```json
{
  "code": "export const code = async (inputs: { ... }) => { ... }",
  "inputs": [
    {
      "name": "inputName",
      "description": "What this input is for",
      "suggestedValue": "Example or hint for the user"
    }
  ],
  "title": "Action Name"
}
```

COMMON MISTAKES TO AVOID:

1. DON'T implement OAuth flows in the code
2. DON'T use environment variables for config
3. DON'T try to do multiple operations in one step
4. DON'T use external libraries without checking availability
5. DON'T forget to return data for next steps
6. DON'T make the title too long or vague

BEST PRACTICES:

1. Keep code simple and focused on one task
2. Use TypeScript types for inputs
3. Return meaningful data structures
4. Include helpful input descriptions
5. Handle errors gracefully
6. Remember: This is ONE step in a larger flow"#;

const API_CALL_ADDENDUM: &str = r#"

ADDITIONAL GUIDELINES FOR API CALLS:

1. Authentication patterns:
   - Bearer token: headers: { 'Authorization': `Bearer ${inputs.token}` }
   - API key in header: headers: { 'X-API-Key': inputs.apiKey }
   - Basic auth: headers: { 'Authorization': `Basic ${btoa(inputs.username + ':' + inputs.password)}` }

2. Always validate response status
3. Parse JSON responses properly
4. Return structured data for next steps
5. Use descriptive variable names"#;

const DATA_TRANSFORM_ADDENDUM: &str = r#"

ADDITIONAL GUIDELINES FOR DATA TRANSFORMATION:

1. Work with arrays and objects from previous steps
2. Use standard JavaScript methods (map, filter, reduce)
3. Return transformed data in a clear structure
4. Handle empty arrays/null values gracefully
5. Keep transformations simple and readable"#;

/// Render guidelines for a context ("general", "api_call", "data_transform").
pub fn guidelines_for(context: &str) -> String {
    match context.trim().to_lowercase().as_str() {
        "api_call" => format!("{}{}", BASE_GUIDELINES, API_CALL_ADDENDUM),
        "data_transform" => format!("{}{}", BASE_GUIDELINES, DATA_TRANSFORM_ADDENDUM),
        _ => BASE_GUIDELINES.to_string(),
    }
}

#[derive(Deserialize)]
struct GuidelinesArgs {
    #[serde(default = "default_context")]
    context: String,
}

fn default_context() -> String {
    "general".to_string()
}

#[async_trait]
impl Tool for CodeGuidelinesTool {
    fn name(&self) -> &str {
        "code_guidelines"
    }

    fn description(&self) -> &str {
        "Get guidelines for generating TypeScript code steps for Flowhub flows"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "code_guidelines",
            "description": "Get guidelines and best practices for generating TypeScript code for Flowhub flow steps. Use BEFORE generating any code.",
            "parameters": {
                "type": "object",
                "properties": {
                    "context": {
                        "type": "string",
                        "description": "The type of code to generate: 'api_call', 'data_transform', or 'general'"
                    }
                }
            }
        })
    }

    async fn call(&self, arguments: &str) -> anyhow::Result<String> {
        let args: GuidelinesArgs =
            serde_json::from_str(arguments).unwrap_or(GuidelinesArgs {
                context: default_context(),
            });
        Ok(guidelines_for(&args.context))
    }

    fn status_message(&self) -> String {
        "Getting code guidelines...".to_string()
    }
}
