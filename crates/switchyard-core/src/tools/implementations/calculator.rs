//! Simple calculator tool - evaluates arithmetic expressions

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::CapabilityError;
use crate::tools::registry::{parse_params, Capability, ToolContext, ToolOutput};

pub struct CalculatorTool;

#[derive(Deserialize)]
struct Params {
    expression: String,
}

#[async_trait]
impl Capability for CalculatorTool {
    fn name(&self) -> &str {
        "simple_calculator"
    }

    fn description(&self) -> &str {
        "Evaluates an arithmetic expression. Supports + - * /, parentheses, unary minus and decimals."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Arithmetic expression, e.g. \"(2 + 3) * 4\""
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(
        &self,
        params: Value,
        _ctx: &mut ToolContext,
    ) -> Result<ToolOutput, CapabilityError> {
        let params: Params = parse_params(params)?;
        let value = evaluate(&params.expression).map_err(CapabilityError::execution)?;
        Ok(ToolOutput::text(format_number(value)))
    }
}

/// Evaluate `expression` with the usual precedence rules.
pub fn evaluate(expression: &str) -> Result<f64, String> {
    let mut parser = Parser {
        chars: expression.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
        depth: 0,
    };
    if parser.chars.is_empty() {
        return Err("empty expression".to_string());
    }

    let value = parser.expression()?;
    if let Some(c) = parser.peek() {
        return Err(format!("unexpected '{}' at position {}", c, parser.pos));
    }
    if !value.is_finite() {
        return Err("result is not a finite number".to_string());
    }
    Ok(value)
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Cap on nested parentheses and unary signs.
const MAX_NESTING: usize = 256;

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    // expression := term (('+' | '-') term)*
    fn expression(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.factor()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            if op == '/' {
                if rhs == 0.0 {
                    return Err("division by zero".to_string());
                }
                value /= rhs;
            } else {
                value *= rhs;
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<f64, String> {
        if self.depth >= MAX_NESTING {
            return Err("expression nested too deeply".to_string());
        }
        self.depth += 1;
        let value = self.unary_or_group();
        self.depth -= 1;
        value
    }

    // factor := '-' factor | '(' expression ')' | number
    fn unary_or_group(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.factor()?)
            }
            Some('+') => {
                self.pos += 1;
                self.factor()
            }
            Some('(') => {
                self.pos += 1;
                let value = self.expression()?;
                match self.bump() {
                    Some(')') => Ok(value),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => Err(format!("unexpected '{}' at position {}", c, self.pos)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn number(&mut self) -> Result<f64, String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.')
        {
            self.pos += 1;
        }
        let literal: String = self.chars[start..self.pos].iter().collect();
        literal
            .parse()
            .map_err(|_| format!("invalid number '{}'", literal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tool_context;

    #[test]
    fn test_precedence_and_parentheses() {
        assert_eq!(evaluate("2+3*4").unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(evaluate("-(1.5 + 0.5) / 4").unwrap(), -0.5);
        assert_eq!(evaluate("10 - 4 - 3").unwrap(), 3.0);
    }

    #[test]
    fn test_errors() {
        assert_eq!(evaluate("1/0").unwrap_err(), "division by zero");
        assert!(evaluate("2 +").is_err());
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("1.2.3").is_err());
        assert!(evaluate("2 $ 3").is_err());
        assert!(evaluate("   ").is_err());
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let nested = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert_eq!(evaluate(&nested).unwrap_err(), "expression nested too deeply");
        assert!(evaluate(&format!("{}1", "-".repeat(10_000))).is_err());

        let shallow = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(evaluate(&shallow).unwrap(), 1.0);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(2.5), "2.5");
    }

    #[tokio::test]
    async fn test_execute() {
        let (mut ctx, _rx) = tool_context("simple_calculator", "{\"expression\":\"2+3\"}");
        let output = CalculatorTool
            .execute(json!({"expression": "2+3"}), &mut ctx)
            .await
            .unwrap();
        assert_eq!(output.content, "5");
    }

    #[tokio::test]
    async fn test_execute_missing_expression() {
        let (mut ctx, _rx) = tool_context("simple_calculator", "{}");
        let err = CalculatorTool.execute(json!({}), &mut ctx).await.unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidArguments(_)));
    }
}
