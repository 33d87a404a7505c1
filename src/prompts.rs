//! Prompt templates for invoice analysis and the chat assistant.

/// Policy applied when the upload does not include one
pub const DEFAULT_POLICY: &str = "\
COMPANY EXPENSE REIMBURSEMENT POLICY

1. Business meals: reimbursable up to $50 per person when a business purpose (client, \
project or team meeting) is stated. Alcohol is not reimbursable without special approval.

2. Transportation: taxis, ride sharing, public transit and airport transfers for business \
travel are reimbursable. Daily commuting to the usual office is not.

3. Accommodation: hotel stays during approved business trips are reimbursable up to $250 \
per night. Minibar, entertainment and personal services are excluded.

4. Office supplies: reasonable supplies needed for work are reimbursable up to $200 per \
invoice. Larger purchases require manager approval.

5. Personal expenses such as groceries, personal shopping or family travel are never \
reimbursable.

6. Every invoice must show a date, a vendor, an itemized amount and the purpose of the \
expense. Invoices missing this information may be declined.";

pub const ANALYSIS_SYSTEM_PROMPT: &str = "\
You are an expert assistant specializing in corporate expense reimbursement analysis. \
You analyze employee invoices against the company reimbursement policy and decide how \
much of each invoice is reimbursable.

Read the policy carefully, extract the key facts from the invoice (date, vendor, items, \
amounts, business purpose) and compare them against the policy limits and exclusions.

Decision categories:
- \"Fully Reimbursed\": the invoice fully complies with the policy
- \"Partially Reimbursed\": some items comply and others do not
- \"Declined\": the invoice violates the policy or lacks required documentation

Always give a clear, professional explanation, quoting the relevant policy section.";

const ANALYSIS_TEMPLATE: &str = "\
COMPANY REIMBURSEMENT POLICY:
{policy_text}

EMPLOYEE INFORMATION:
Employee Name: {employee_name}

INVOICE DETAILS:
{invoice_text}

Analyze this invoice against the policy. Consider policy compliance, documentation, \
whether the amounts are within limits and whether there is a clear business purpose.

Respond with a single JSON object containing exactly these fields:
{
  \"status\": \"Fully Reimbursed\" | \"Partially Reimbursed\" | \"Declined\",
  \"reason\": \"Detailed explanation of the decision\",
  \"reimbursable_amount\": 125.50,
  \"total_amount\": 150.00,
  \"invoice_date\": \"YYYY-MM-DD or null if the invoice has no date\",
  \"policy_violations\": [\"Specific policy violations, if any\"],
  \"compliance_notes\": \"Additional compliance information and recommendations\"
}

Amounts are plain numbers without currency symbols.";

pub const FEW_SHOT_EXAMPLES: &str = "\
EXAMPLES:

Policy: \"Business meals maximum $50 per person\"
Invoice: \"Lunch with client John Doe - $45.00 at Restaurant ABC\"
Status: \"Fully Reimbursed\", reason: business meal within the limit with a clear purpose.

Policy: \"No alcohol without special approval\"
Invoice: \"Team dinner $120 - $100 food, $20 wine\"
Status: \"Partially Reimbursed\", reimbursable 100.00: the alcohol requires approval.

Policy: \"Personal expenses not reimbursable\"
Invoice: \"Personal grocery shopping - $75.00\"
Status: \"Declined\": personal expenses are excluded by the policy.";

pub const CHAT_SYSTEM_PROMPT: &str = "\
You are a helpful assistant for an Invoice Reimbursement System. You help users find and \
understand information about processed employee invoices and reimbursement decisions.

- Only use information from the retrieved invoice data; never invent invoices, amounts or \
names.
- Cite specific invoice details (invoice id, employee, amounts, dates, status) when you \
make a claim.
- Format answers in markdown, using bold text and bullet points where it helps.
- If the data is insufficient, say so and suggest a more specific question.";

const CHAT_TEMPLATE: &str = "\
CONVERSATION HISTORY:
{chat_history}

RETRIEVED INVOICE DATA:
{context_data}

USER QUESTION:
{user_query}

Answer the question using the retrieved invoice data. Respond in markdown.";

const NO_RESULTS_GUIDANCE: &str = "\
No processed invoices matched this question. Politely explain that nothing was found, \
suggest possible reasons (spelling of the employee name, a date range with no invoices, \
a status with no matches) and offer two or three example questions that would work, such \
as \"Show me declined invoices for John Smith\".";

/// Render the user prompt for one invoice analysis
pub fn analysis_prompt(policy_text: &str, employee_name: &str, invoice_text: &str) -> String {
    let prompt = ANALYSIS_TEMPLATE
        .replace("{policy_text}", policy_text)
        .replace("{employee_name}", employee_name)
        .replace("{invoice_text}", invoice_text);
    format!("{}\n\n{}", prompt, FEW_SHOT_EXAMPLES)
}

/// Render the chat prompt; `context_data` empty means nothing was retrieved
pub fn chat_prompt(chat_history: &str, context_data: &str, user_query: &str) -> String {
    let history = if chat_history.is_empty() {
        "(no previous messages)"
    } else {
        chat_history
    };
    let context = if context_data.is_empty() {
        NO_RESULTS_GUIDANCE
    } else {
        context_data
    };

    CHAT_TEMPLATE
        .replace("{chat_history}", history)
        .replace("{context_data}", context)
        .replace("{user_query}", user_query)
}
