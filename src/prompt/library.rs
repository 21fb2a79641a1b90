//! Fixed few-shot example library.

use crate::format::InputFormat;
use crate::load_test::{LoadPatternKind, TestType};
use serde::Serialize;

/// One input/output pair shown to the AI provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptExample {
    pub input: String,
    /// Expected spec, as compact JSON.
    pub output: String,
    pub format: InputFormat,
    pub method: String,
    pub url: String,
    pub test_type: TestType,
    pub load_pattern: LoadPatternKind,
}

#[allow(clippy::too_many_arguments)]
fn example(
    input: &str,
    format: InputFormat,
    method: &str,
    url: &str,
    test_type: TestType,
    load_pattern: LoadPatternKind,
    output: serde_json::Value,
) -> PromptExample {
    PromptExample {
        input: input.to_string(),
        output: output.to_string(),
        format,
        method: method.to_string(),
        url: url.to_string(),
        test_type,
        load_pattern,
    }
}

/// The built-in examples.
pub fn example_library() -> Vec<PromptExample> {
    use serde_json::json;
    vec![
        example(
            r#"curl -X POST https://api.example.com/users -H 'Content-Type: application/json' -d '{"name":"{{name}}"}' with 50 users for 2 minutes"#,
            InputFormat::CurlCommand,
            "POST",
            "https://api.example.com/users",
            TestType::Load,
            LoadPatternKind::Constant,
            json!({
                "name": "Create users",
                "testType": "load",
                "requests": [{
                    "method": "POST",
                    "url": "https://api.example.com/users",
                    "headers": {"Content-Type": "application/json"},
                    "payload": {"template": "{\"name\":\"{{name}}\"}", "variables": [{"name": "name", "type": "string"}]}
                }],
                "loadPattern": {"type": "constant", "virtualUsers": 50},
                "duration": {"value": 2, "unit": "minutes"}
            }),
        ),
        example(
            "GET /api/products HTTP/1.1\nHost: shop.example.com\nAccept: application/json",
            InputFormat::HttpRaw,
            "GET",
            "https://shop.example.com/api/products",
            TestType::Baseline,
            LoadPatternKind::Constant,
            json!({
                "name": "Product listing baseline",
                "testType": "baseline",
                "requests": [{
                    "method": "GET",
                    "url": "https://shop.example.com/api/products",
                    "headers": {"Accept": "application/json"}
                }],
                "loadPattern": {"type": "constant", "virtualUsers": 10},
                "duration": {"value": 30, "unit": "seconds"}
            }),
        ),
        example(
            "Spike test the login endpoint https://auth.example.com/login, jump to 500 users for 1 minute",
            InputFormat::NaturalLanguage,
            "POST",
            "https://auth.example.com/login",
            TestType::Spike,
            LoadPatternKind::Spike,
            json!({
                "name": "Login spike",
                "testType": "spike",
                "requests": [{"method": "POST", "url": "https://auth.example.com/login"}],
                "loadPattern": {"type": "spike", "virtualUsers": 500},
                "duration": {"value": 1, "unit": "minutes"}
            }),
        ),
        example(
            "Stress test GET https://api.example.com/search, ramp up gradually to 1000 users over 10 minutes",
            InputFormat::NaturalLanguage,
            "GET",
            "https://api.example.com/search",
            TestType::Stress,
            LoadPatternKind::Ramp,
            json!({
                "name": "Search stress",
                "testType": "stress",
                "requests": [{"method": "GET", "url": "https://api.example.com/search"}],
                "loadPattern": {"type": "ramp", "virtualUsers": 1000, "rampUpTime": {"value": 10, "unit": "minutes"}},
                "duration": {"value": 10, "unit": "minutes"}
            }),
        ),
        example(
            "Soak the orders API (GET https://api.example.com/orders) at 20 rps for 2 hours",
            InputFormat::NaturalLanguage,
            "GET",
            "https://api.example.com/orders",
            TestType::Endurance,
            LoadPatternKind::Constant,
            json!({
                "name": "Orders endurance",
                "testType": "endurance",
                "requests": [{"method": "GET", "url": "https://api.example.com/orders"}],
                "loadPattern": {"type": "constant", "requestsPerSecond": 20},
                "duration": {"value": 2, "unit": "hours"}
            }),
        ),
        example(
            "Request 1: POST https://api.example.com/cart {\"sku\": \"{{sku}}\"}\nRequest 2: POST https://api.example.com/checkout",
            InputFormat::ConcatenatedRequests,
            "POST",
            "https://api.example.com/cart",
            TestType::Load,
            LoadPatternKind::Constant,
            json!({
                "name": "Cart checkout flow",
                "testType": "load",
                "requests": [
                    {"method": "POST", "url": "https://api.example.com/cart", "headers": {"Content-Type": "application/json"},
                     "payload": {"template": "{\"sku\": \"{{sku}}\"}", "variables": [{"name": "sku", "type": "string"}]}},
                    {"method": "POST", "url": "https://api.example.com/checkout"}
                ],
                "loadPattern": {"type": "constant", "virtualUsers": 10},
                "duration": {"value": 30, "unit": "seconds"},
                "workflow": [{"name": "add to cart", "requestIndex": 0}, {"name": "checkout", "requestIndex": 1, "thinkTimeMs": 1000}]
            }),
        ),
        example(
            "Send this to PUT https://api.example.com/profile/{{userId}}: {\"bio\": \"hello\", \"updatedAt\": \"{{timestamp}}\"}",
            InputFormat::JsonWithText,
            "PUT",
            "https://api.example.com/profile/{{userId}}",
            TestType::Load,
            LoadPatternKind::Constant,
            json!({
                "name": "Profile update",
                "testType": "load",
                "requests": [{
                    "method": "PUT",
                    "url": "https://api.example.com/profile/{{userId}}",
                    "headers": {"Content-Type": "application/json"},
                    "payload": {"template": "{\"bio\": \"hello\", \"updatedAt\": \"{{timestamp}}\"}",
                                "variables": [{"name": "timestamp", "type": "timestamp"}]}
                }],
                "loadPattern": {"type": "constant", "virtualUsers": 10},
                "duration": {"value": 30, "unit": "seconds"}
            }),
        ),
        example(
            "Volume test: DELETE https://api.example.com/sessions/{{sessionId}} 10000 times with 100 users",
            InputFormat::NaturalLanguage,
            "DELETE",
            "https://api.example.com/sessions/{{sessionId}}",
            TestType::Volume,
            LoadPatternKind::Constant,
            json!({
                "name": "Session cleanup volume",
                "testType": "volume",
                "requests": [{"method": "DELETE", "url": "https://api.example.com/sessions/{{sessionId}}"}],
                "loadPattern": {"type": "constant", "virtualUsers": 100},
                "duration": {"value": 5, "unit": "minutes"}
            }),
        ),
    ]
}
