//! Built-in arithmetic tools

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Number;

use super::tool::{Op, ToolError, ToolOutput};

/// Operands are kept as JSON numbers so integers stay exact past 2^53.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ArithmeticInput {
    /// First operand
    #[schemars(with = "f64")]
    pub a: Number,
    /// Second operand
    #[schemars(with = "f64")]
    pub b: Number,
}

#[derive(Debug, Clone, Copy)]
enum Operand {
    Int(i128),
    Float(f64),
}

impl Operand {
    fn as_f64(self) -> f64 {
        match self {
            Operand::Int(i) => i as f64,
            Operand::Float(f) => f,
        }
    }
}

impl TryFrom<&Number> for Operand {
    type Error = ToolError;

    fn try_from(n: &Number) -> Result<Self, Self::Error> {
        if let Some(i) = n.as_i64() {
            Ok(Operand::Int(i128::from(i)))
        } else if let Some(u) = n.as_u64() {
            Ok(Operand::Int(i128::from(u)))
        } else {
            n.as_f64()
                .map(Operand::Float)
                .ok_or_else(|| ToolError::InvalidArguments(format!("{n} is not a usable number")))
        }
    }
}

/// Exact integer arithmetic when both operands are integers, f64 otherwise.
fn apply(
    input: &ArithmeticInput,
    int_op: fn(i128, i128) -> Option<i128>,
    float_op: fn(f64, f64) -> f64,
) -> Result<String, ToolError> {
    match (Operand::try_from(&input.a)?, Operand::try_from(&input.b)?) {
        (Operand::Int(a), Operand::Int(b)) => int_op(a, b)
            .map(|v| v.to_string())
            .ok_or_else(|| ToolError::Failed("result is out of range".to_string())),
        (a, b) => render(float_op(a.as_f64(), b.as_f64())),
    }
}

pub struct Add;

impl Op for Add {
    type Input = ArithmeticInput;

    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two integers"
    }

    fn execute(&self, input: ArithmeticInput) -> Result<ToolOutput, ToolError> {
        apply(&input, i128::checked_add, |a, b| a + b).map(ToolOutput::text)
    }
}

pub struct Subtract;

impl Op for Subtract {
    type Input = ArithmeticInput;

    fn name(&self) -> &str {
        "subtract"
    }

    fn description(&self) -> &str {
        "Subtract two integers"
    }

    fn execute(&self, input: ArithmeticInput) -> Result<ToolOutput, ToolError> {
        apply(&input, i128::checked_sub, |a, b| a - b).map(ToolOutput::text)
    }
}

/// Float results; integral values print without a fractional part (`2`, not `2.0`).
fn render(value: f64) -> Result<String, ToolError> {
    if !value.is_finite() {
        return Err(ToolError::Failed("result is out of range".to_string()));
    }
    if value == 0.0 {
        // covers -0.0
        return Ok("0".to_string());
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tool::Tool;
    use serde_json::json;

    fn run(tool: &dyn Tool, a: serde_json::Value, b: serde_json::Value) -> Result<String, ToolError> {
        tool.call(json!({"a": a, "b": b}))
            .map(|output| output.into_result().joined_text())
    }

    #[test]
    fn test_add() {
        assert_eq!(run(&Add, json!(1), json!(2)).unwrap(), "3");
        assert_eq!(run(&Add, json!(1.5), json!(1)).unwrap(), "2.5");
        assert_eq!(run(&Add, json!(-2), json!(2)).unwrap(), "0");
    }

    #[test]
    fn test_subtract() {
        assert_eq!(run(&Subtract, json!(5), json!(3)).unwrap(), "2");
        assert_eq!(run(&Subtract, json!(3), json!(5)).unwrap(), "-2");
    }

    #[test]
    fn test_integers_stay_exact_past_f64_precision() {
        assert_eq!(run(&Add, json!(9007199254740993u64), json!(0)).unwrap(), "9007199254740993");
        assert_eq!(
            run(&Subtract, json!(9007199254740993u64), json!(9007199254740992u64)).unwrap(),
            "1"
        );
        assert_eq!(run(&Add, json!(u64::MAX), json!(1)).unwrap(), "18446744073709551616");
        assert_eq!(run(&Subtract, json!(i64::MIN), json!(1)).unwrap(), "-9223372036854775809");
    }

    #[test]
    fn test_mixed_operands_use_float() {
        assert_eq!(run(&Subtract, json!(3), json!(0.5)).unwrap(), "2.5");
    }

    #[test]
    fn test_overflow_is_a_tool_failure() {
        let err = run(&Add, json!(f64::MAX), json!(f64::MAX)).unwrap_err();
        assert!(matches!(err, ToolError::Failed(_)));
    }

    #[test]
    fn test_schema_requires_both_operands() {
        let schema = Tool::input_schema(&Add);
        assert_eq!(schema["properties"]["a"]["type"], "number");
        assert_eq!(schema["properties"]["b"]["type"], "number");
        let mut required: Vec<String> =
            serde_json::from_value(schema["required"].clone()).unwrap();
        required.sort();
        assert_eq!(required, vec!["a", "b"]);
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(Tool::description(&Add), "Add two integers");
        assert_eq!(Tool::description(&Subtract), "Subtract two integers");
    }
}
