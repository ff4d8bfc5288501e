use crate::{Expr, Literal, OptionRef, ParseErr, ParseResult, SubstringLen};

pub use pest::{
    iterators::{Pair, Pairs},
    pratt_parser::{Assoc, Op, PrattParser},
    Parser,
};
use pest_derive::Parser;
use proto::v4::{dhcp4_space, Message};

#[derive(Parser)]
#[grammar = "grammar.pest"]
pub struct PredicateParser;

/// parse a class expression into its predicate tree
pub fn parse(expr: &str) -> ParseResult<Expr> {
    let pairs = PredicateParser::parse(Rule::expr, expr).map_err(Box::new)?;
    build_ast(pairs)
}

/// build an [`Expr`] from lexed pairs
pub fn build_ast(pairs: Pairs<'_, Rule>) -> ParseResult<Expr> {
    // ops registered low-to-high: `and` binds tighter than `or`
    let pratt = PrattParser::new()
        .op(Op::infix(Rule::or, Assoc::Left))
        .op(Op::infix(Rule::and, Assoc::Left));
    parse_expr(pairs, &pratt)
}

/// evaluate a predicate against a packet; short-circuits
pub fn eval(expr: &Expr, msg: &Message) -> bool {
    match expr {
        Expr::Exists(OptionRef(code)) => msg.opts().get(*code).is_some(),
        Expr::Compare {
            opt,
            negated,
            literal,
        } => match option_bytes(msg, opt.0) {
            Some(bytes) => (bytes == literal.bytes()) != *negated,
            None => false,
        },
        Expr::Substring {
            opt,
            start,
            len,
            literal,
        } => match option_bytes(msg, opt.0) {
            Some(bytes) => substring(&bytes, *start, *len) == literal.bytes(),
            None => false,
        },
        Expr::And(lhs, rhs) => eval(lhs, msg) && eval(rhs, msg),
        Expr::Or(lhs, rhs) => eval(lhs, msg) || eval(rhs, msg),
    }
}

fn option_bytes(msg: &Message, code: u8) -> Option<Vec<u8>> {
    msg.opts().get(code).map(|opt| opt.data().to_bytes())
}

fn substring(bytes: &[u8], start: usize, len: SubstringLen) -> &[u8] {
    let start = start.min(bytes.len());
    match len {
        SubstringLen::All => &bytes[start..],
        SubstringLen::Len(n) => &bytes[start..(start + n).min(bytes.len())],
    }
}

fn next_pair<'a>(pairs: &mut Pairs<'a, Rule>) -> ParseResult<Pair<'a, Rule>> {
    pairs.next().ok_or(ParseErr::Undefined(Rule::expr))
}

fn parse_option(pair: Pair<'_, Rule>) -> ParseResult<OptionRef> {
    let name = pair.into_inner().as_str();
    dhcp4_space()
        .resolve(name)
        .map(OptionRef)
        .ok_or_else(|| ParseErr::UnknownOption(name.to_string()))
}

fn parse_literal(pair: Pair<'_, Rule>) -> ParseResult<Literal> {
    Ok(match pair.as_rule() {
        Rule::string => Literal::Str(
            pair.as_str()
                .trim_start_matches('\'')
                .trim_end_matches('\'')
                .to_string(),
        ),
        Rule::hex => {
            let digits = &pair.as_str()[2..];
            Literal::Hex(if digits.len() % 2 == 1 {
                hex::decode(format!("0{digits}"))?
            } else {
                hex::decode(digits)?
            })
        }
        rule => return Err(ParseErr::Undefined(rule)),
    })
}

fn parse_expr(pairs: Pairs<'_, Rule>, pratt: &PrattParser<Rule>) -> ParseResult<Expr> {
    pratt
        .map_primary(|primary| {
            Ok(match primary.as_rule() {
                Rule::exists => {
                    let mut inner = primary.into_inner();
                    Expr::Exists(parse_option(next_pair(&mut inner)?)?)
                }
                Rule::compare => {
                    let mut inner = primary.into_inner();
                    let opt = parse_option(next_pair(&mut inner)?)?;
                    let negated = next_pair(&mut inner)?.as_rule() == Rule::neq;
                    let literal = parse_literal(next_pair(&mut inner)?)?;
                    Expr::Compare {
                        opt,
                        negated,
                        literal,
                    }
                }
                Rule::substring => {
                    let mut inner = primary.into_inner();
                    let opt = parse_option(next_pair(&mut inner)?)?;
                    let start = next_pair(&mut inner)?.as_str().parse()?;
                    let len_pair = next_pair(&mut inner)?;
                    let len = match len_pair.as_rule() {
                        Rule::all => SubstringLen::All,
                        Rule::integer => SubstringLen::Len(len_pair.as_str().parse()?),
                        rule => return Err(ParseErr::Undefined(rule)),
                    };
                    // the grammar only admits `==` here
                    let _eq = next_pair(&mut inner)?;
                    let literal = parse_literal(next_pair(&mut inner)?)?;
                    Expr::Substring {
                        opt,
                        start,
                        len,
                        literal,
                    }
                }
                // from "(" ~ expr ~ ")"
                Rule::expr => parse_expr(primary.into_inner(), pratt)?,
                rule => return Err(ParseErr::Undefined(rule)),
            })
        })
        .map_infix(|lhs, op, rhs| {
            Ok(match op.as_rule() {
                Rule::and => Expr::And(Box::new(lhs?), Box::new(rhs?)),
                Rule::or => Expr::Or(Box::new(lhs?), Box::new(rhs?)),
                rule => return Err(ParseErr::Undefined(rule)),
            })
        })
        .parse(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::v4::DhcpOption;
    use std::net::Ipv4Addr;

    fn msg_with_class(class: &str) -> Message {
        let uns = Ipv4Addr::UNSPECIFIED;
        let mut msg = Message::new(uns, uns, uns, uns, &[0, 1, 2, 3, 4, 5]);
        msg.opts_mut()
            .insert(DhcpOption::vendor_class_identifier(class));
        msg
    }

    #[test]
    fn test_exists() {
        let expr = parse("option[vendor-class-identifier].exists").unwrap();
        assert!(eval(&expr, &msg_with_class("MSFT 5.0")));

        let expr = parse("option[61].exists").unwrap();
        assert!(!eval(&expr, &msg_with_class("MSFT 5.0")));
    }

    #[test]
    fn test_compare() {
        let msg = msg_with_class("MSFT 5.0");
        assert!(eval(&parse("option[60] == 'MSFT 5.0'").unwrap(), &msg));
        assert!(eval(&parse("option[60] != 'MSFT 6.0'").unwrap(), &msg));
        assert!(!eval(&parse("option[60] == 'MSFT 6.0'").unwrap(), &msg));
        // missing option compares false either way
        assert!(!eval(&parse("option[61] != 'anything'").unwrap(), &msg));
    }

    #[test]
    fn test_hex_literal() {
        let msg = msg_with_class("MSFT 5.0");
        // 0x4d534654 == "MSFT"
        assert!(eval(
            &parse("substring(option[60], 0, 4) == 0x4d534654").unwrap(),
            &msg
        ));
    }

    #[test]
    fn test_substring_all() {
        let msg = msg_with_class("MSFT 5.0");
        assert!(eval(
            &parse("substring(option[60], 5, all) == '5.0'").unwrap(),
            &msg
        ));
        // starting past the end yields the empty slice
        assert!(eval(
            &parse("substring(option[60], 64, all) == ''").unwrap(),
            &msg
        ));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let msg = msg_with_class("MSFT 5.0");
        // parsed as A or (B and C): true or (true and false) == true
        let expr = parse(
            "option[60].exists or option[60] == 'MSFT 5.0' and option[61].exists",
        )
        .unwrap();
        assert!(matches!(expr, Expr::Or(_, _)));
        assert!(eval(&expr, &msg));
        // with parens forcing (A or B) and C: false
        let expr = parse(
            "(option[60].exists or option[60] == 'MSFT 5.0') and option[61].exists",
        )
        .unwrap();
        assert!(matches!(expr, Expr::And(_, _)));
        assert!(!eval(&expr, &msg));
    }

    #[test]
    fn test_unknown_option_name() {
        assert!(matches!(
            parse("option[frobnicator].exists"),
            Err(ParseErr::UnknownOption(_))
        ));
    }
}
