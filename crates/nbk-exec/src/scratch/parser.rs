use super::ast::{BinOp, Builtin, Expr, TypeName, Unit};

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Punct(char),
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() {
            let mut digits = String::new();
            while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(d);
                chars.next();
            }
            let value = digits
                .parse()
                .map_err(|_| format!("integer number too large: {digits}"))?;
            tokens.push(Token::Int(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut word = String::new();
            while let Some(&d) = chars.peek().filter(|d| d.is_alphanumeric() || **d == '_') {
                word.push(d);
                chars.next();
            }
            tokens.push(Token::Ident(word));
        } else if c == '"' {
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some(other) => text.push(other),
                        None => return Err("unclosed string literal".into()),
                    },
                    Some(other) => text.push(other),
                    None => return Err("unclosed string literal".into()),
                }
            }
            tokens.push(Token::Str(text));
        } else if "+-*/%=(),;".contains(c) {
            tokens.push(Token::Punct(c));
            chars.next();
        } else {
            return Err(format!("illegal character: '{c}'"));
        }
    }
    Ok(tokens)
}

/// Deepest syntax tree a unit may have. Stored units are JSON and serde_json
/// refuses to read documents nested past 128 levels.
const MAX_DEPTH: usize = 40;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

/// Parses a single statement; a trailing `;` is optional.
pub fn parse_unit(source: &str) -> Result<Unit, String> {
    let mut parser = Parser { tokens: tokenize(source)?, pos: 0, depth: 0 };
    let unit = parser.statement()?;
    parser.eat(';');
    match parser.peek() {
        None => Ok(unit),
        Some(token) => Err(format!("unexpected {} after statement", describe(token))),
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Int(n) => format!("'{n}'"),
        Token::Str(_) => "string literal".into(),
        Token::Ident(word) => format!("'{word}'"),
        Token::Punct(c) => format!("'{c}'"),
    }
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, punct: char) -> bool {
        if self.peek() == Some(&Token::Punct(punct)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: char) -> Result<(), String> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(match self.peek() {
                Some(token) => format!("'{punct}' expected, found {}", describe(token)),
                None => format!("'{punct}' expected"),
            })
        }
    }

    /// Bounds recursion on the parsing thread and the depth of the tree it builds.
    fn enter(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(format!("expression too deeply nested (limit {MAX_DEPTH})"));
        }
        Ok(())
    }

    fn statement(&mut self) -> Result<Unit, String> {
        if let (Some(Token::Ident(word)), Some(Token::Ident(name))) = (self.peek(), self.peek_at(1)) {
            let ty = TypeName::from_keyword(word).ok_or_else(|| format!("cannot find symbol: class {word}"))?;
            let name = name.clone();
            self.pos += 2;
            let init = if self.eat('=') { Some(self.expr()?) } else { None };
            if ty == TypeName::Var && init.is_none() {
                return Err("cannot infer type for local variable without initializer".into());
            }
            return Ok(Unit::Declare { ty, name, init });
        }
        if let (Some(Token::Ident(name)), Some(Token::Punct('='))) = (self.peek(), self.peek_at(1)) {
            let name = name.clone();
            self.pos += 2;
            return Ok(Unit::Assign { name, value: self.expr()? });
        }
        Ok(Unit::Eval(self.expr()?))
    }

    fn expr(&mut self) -> Result<Expr, String> {
        let base = self.depth;
        let mut lhs = self.term()?;
        loop {
            let op = if self.eat('+') {
                BinOp::Add
            } else if self.eat('-') {
                BinOp::Sub
            } else {
                self.depth = base;
                return Ok(lhs);
            };
            self.enter()?;
            let rhs = self.term()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
    }

    fn term(&mut self) -> Result<Expr, String> {
        let base = self.depth;
        let mut lhs = self.unary()?;
        loop {
            let op = if self.eat('*') {
                BinOp::Mul
            } else if self.eat('/') {
                BinOp::Div
            } else if self.eat('%') {
                BinOp::Rem
            } else {
                self.depth = base;
                return Ok(lhs);
            };
            self.enter()?;
            let rhs = self.unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        self.enter()?;
        let expr = if self.eat('-') { Expr::Neg(Box::new(self.unary()?)) } else { self.primary()? };
        self.depth -= 1;
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Expr::Int(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Ident(name)) if self.eat('(') => {
                let func = Builtin::from_name(&name).ok_or_else(|| format!("cannot find symbol: method {name}"))?;
                let mut args = Vec::new();
                if !self.eat(')') {
                    loop {
                        args.push(self.expr()?);
                        if self.eat(')') {
                            break;
                        }
                        self.expect(',')?;
                    }
                }
                if args.len() != 1 {
                    return Err(format!("method {name} expects 1 argument, found {}", args.len()));
                }
                Ok(Expr::Call { func, args })
            }
            Some(Token::Ident(name)) => Ok(Expr::Var(name)),
            Some(Token::Punct('(')) => {
                let inner = self.expr()?;
                self.expect(')')?;
                Ok(inner)
            }
            Some(token) => Err(format!("illegal start of expression: {}", describe(&token))),
            None => Err("illegal start of expression".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_declaration_with_initializer() {
        let unit = parse_unit("int x = 1 + 2 * 3;").unwrap();
        let Unit::Declare { ty, name, init: Some(Expr::Binary { op: BinOp::Add, rhs, .. }) } = unit.clone() else {
            panic!("unexpected {unit:?}");
        };
        assert_eq!(ty, TypeName::Int);
        assert_eq!(name, "x");
        assert!(matches!(*rhs, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn parses_assignment_and_expression() {
        assert!(matches!(parse_unit("x = 5").unwrap(), Unit::Assign { .. }));
        assert_eq!(
            parse_unit("fail(\"no\")").unwrap(),
            Unit::Eval(Expr::Call { func: Builtin::Fail, args: vec![Expr::Str("no".into())] })
        );
    }

    #[test]
    fn reports_unknown_type_and_method() {
        assert_eq!(parse_unit("double d = 1;").unwrap_err(), "cannot find symbol: class double");
        assert_eq!(parse_unit("println(1)").unwrap_err(), "cannot find symbol: method println");
    }

    #[test]
    fn rejects_trailing_tokens() {
        assert!(parse_unit("1 2").is_err());
        assert!(parse_unit("var v;").is_err());
    }

    #[test]
    fn parses_print_call() {
        assert_eq!(
            parse_unit("print(\"hi\");").unwrap(),
            Unit::Eval(Expr::Call { func: Builtin::Print, args: vec![Expr::Str("hi".into())] })
        );
    }

    #[test]
    fn deep_nesting_is_a_diagnostic() {
        let source = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
        assert_eq!(parse_unit(&source).unwrap_err(), "expression too deeply nested (limit 40)");
        assert!(parse_unit(&format!("{}1", "-".repeat(100))).is_err());

        let chain = vec!["1"; 100].join(" + ");
        assert!(parse_unit(&chain).unwrap_err().contains("too deeply nested"));
    }

    #[test]
    fn moderate_nesting_parses() {
        let source = format!("{}1{}", "(".repeat(20), ")".repeat(20));
        assert_eq!(parse_unit(&source).unwrap(), Unit::Eval(Expr::Int(1)));
        assert!(parse_unit(&vec!["1"; 20].join(" * ")).is_ok());
    }
}
