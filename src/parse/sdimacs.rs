//! Parser for QDIMACS and its stochastic extension with random (`r <p>`) and
//! threshold (`t <p>`) prefix lines.

use super::super::*;
use super::dimacs::*;
use super::ParseError;

/// Parses a (S)DIMACS instance into a matrix with compacted prefix.
/// Variables that occur in clauses but not in the prefix are bound existentially
/// at the outermost level.
pub fn parse(content: &str) -> Result<Matrix, ParseError> {
    let mut lexer = DimacsTokenStream::new(content);
    let (num_variables, num_clauses) = parse_header(&mut lexer)?;
    let (entries, current) = parse_prefix(&mut lexer)?;
    let prefix = Prefix::compact(entries, num_variables).map_err(|msg| ParseError {
        msg,
        pos: lexer.pos(),
    })?;
    let mut matrix = Matrix::new(prefix, num_clauses);
    parse_matrix(&mut lexer, &mut matrix, current, num_clauses)?;
    matrix.bind_free_variables();
    Ok(matrix)
}

/// Reads prefix lines, returns them together with the first token of the matrix.
fn parse_prefix(
    lexer: &mut DimacsTokenStream,
) -> Result<(Vec<PrefixEntry>, DimacsToken), ParseError> {
    let mut entries = Vec::new();
    loop {
        let (quantifier, probability) = match lexer.next_token()? {
            DimacsToken::EOL => continue,
            DimacsToken::Quant(QuantKind::Threshold(threshold)) => {
                // the remainder of a threshold line carries no information
                loop {
                    match lexer.next_token()? {
                        DimacsToken::EOL | DimacsToken::EOF => break,
                        _ => continue,
                    }
                }
                entries.push(PrefixEntry::Threshold(threshold));
                continue;
            }
            DimacsToken::Quant(QuantKind::Exists) => (Quantifier::Existential, None),
            DimacsToken::Quant(QuantKind::Forall) => (Quantifier::Universal, None),
            DimacsToken::Quant(QuantKind::Random(p)) => {
                (Quantifier::Random, if p < 0.0 { None } else { Some(p) })
            }
            token => return Ok((entries, token)),
        };
        let mut variables = Vec::new();
        loop {
            match lexer.next_token()? {
                DimacsToken::Lit(l) if !l.signed() => variables.push(l.variable()),
                DimacsToken::Zero => break,
                DimacsToken::EOL => continue,
                token => {
                    return Err(ParseError {
                        msg: format!(
                            "Expected variable or `0` in quantifier line, found `{:?}`",
                            token
                        ),
                        pos: lexer.pos(),
                    })
                }
            }
        }
        entries.push(PrefixEntry::Quantified {
            quantifier,
            probability,
            variables,
        });
    }
}
