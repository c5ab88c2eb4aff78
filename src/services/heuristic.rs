//! 本地启发式分析器 - 业务能力层
//!
//! 文本生成服务不可用时的降级分析。纯函数、确定性：相同的代码永远得到相同的结果。
//!
//! 检查项：
//! - 是否有输出语句（`print(`）
//! - 一组固定的语法错误模式，只报告第一个命中（先按行号，再按模式顺序）
//! - 是否有注释、是否需要拆分函数

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{AnalysisResult, AnalysisSource, Insight, Severity, Submission};

static BLOCK_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(if|elif|else|for|while|def|class|try|except|finally|with)\b")
        .expect("block keyword pattern")
});

static CONDITION_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(if|elif|while)\b").expect("condition keyword pattern"));

static PRINT_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bprint\s*\(").expect("print call pattern"));

static FUNCTION_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(async\s+)?def\s").expect("def pattern"));

/// 建议拆分函数的最少非空行数
const FUNCTION_HINT_MIN_LINES: usize = 5;

const FALLBACK_HEADER: &str =
    "Detailed feedback is unavailable right now, so here is a quick local check of your code.";

/// 语法错误模式（顺序即优先级）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SyntaxPattern {
    MissingColon,
    Bracket,
    UnterminatedString,
    AssignmentInCondition,
}

#[derive(Debug, Clone)]
struct SyntaxIssue {
    line: usize,
    pattern: SyntaxPattern,
    explanation: String,
}

/// 单行扫描结果
#[derive(Debug, Default)]
struct ScannedLine {
    /// 去掉字符串内容和注释后的代码
    code: String,
    has_comment: bool,
    unterminated_string: bool,
}

/// 启发式分析器
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// 分析一次提交
    pub fn analyze(&self, submission: &Submission) -> AnalysisResult {
        let code = submission.code();
        let source_lines: Vec<&str> = code.lines().collect();
        let scanned = scan_lines(&source_lines);

        let issue = first_syntax_issue(&scanned);
        let insights = issue
            .iter()
            .map(|issue| Insight {
                line: issue.line,
                snippet: source_lines
                    .get(issue.line - 1)
                    .map(|l| l.trim().to_string())
                    .unwrap_or_default(),
                explanation: issue.explanation.clone(),
                severity: Severity::Error,
            })
            .collect();

        let feedback_text = compose_feedback(code, &scanned, issue.as_ref());

        AnalysisResult {
            submission_id: submission.id(),
            feedback_text,
            insights,
            source: AnalysisSource::Fallback,
        }
    }
}

fn compose_feedback(code: &str, scanned: &[ScannedLine], issue: Option<&SyntaxIssue>) -> String {
    let mut notes = Vec::new();

    if let Some(issue) = issue {
        notes.push(format!(
            "Possible syntax error on line {}: {}",
            issue.line, issue.explanation
        ));
    }

    if scanned.iter().any(|l| PRINT_CALL.is_match(&l.code)) {
        notes.push("Your code uses print() to show its output.".to_string());
    } else {
        notes.push(
            "Your code does not print anything. Add print() calls to see what it computes."
                .to_string(),
        );
    }

    if !scanned.iter().any(|l| l.has_comment) {
        notes.push("Add comments that explain what each part of your code does.".to_string());
    }

    let non_blank = code.lines().filter(|l| !l.trim().is_empty()).count();
    if non_blank >= FUNCTION_HINT_MIN_LINES && !FUNCTION_DEF.is_match(code) {
        notes.push(
            "Consider splitting your code into functions to make it easier to read and reuse."
                .to_string(),
        );
    }

    let mut text = String::from(FALLBACK_HEADER);
    for note in notes {
        text.push_str("\n- ");
        text.push_str(&note);
    }
    text
}

fn first_syntax_issue(lines: &[ScannedLine]) -> Option<SyntaxIssue> {
    let mut issues = Vec::new();
    issues.extend(bracket_issue(lines));

    // 行首所在的括号深度，以及上一行是否以续行符结尾
    let mut depth = 0i64;
    let mut continued = false;

    for (index, line) in lines.iter().enumerate() {
        let number = index + 1;
        let code = line.code.trim_end();
        let starts_statement = depth == 0 && !continued;
        depth = (depth + bracket_balance(code)).max(0);
        continued = code.ends_with('\\');

        if line.unterminated_string {
            issues.push(SyntaxIssue {
                line: number,
                pattern: SyntaxPattern::UnterminatedString,
                explanation: "This string is never closed. Add the matching quote.".to_string(),
            });
        }

        // 括号内或续行中的 if/for/else 属于表达式，不是语句头
        if !starts_statement {
            continue;
        }
        let Some(keyword) = BLOCK_KEYWORD.find(code) else {
            continue;
        };

        let colon = header_colon(code, keyword.end());
        if colon.is_none() && !continued && depth == 0 {
            issues.push(SyntaxIssue {
                line: number,
                pattern: SyntaxPattern::MissingColon,
                explanation: "This block statement must end with a colon (:).".to_string(),
            });
        }

        if CONDITION_KEYWORD.is_match(code) {
            let header = &code[keyword.end()..colon.unwrap_or(code.len())];
            if has_bare_assignment(header) {
                issues.push(SyntaxIssue {
                    line: number,
                    pattern: SyntaxPattern::AssignmentInCondition,
                    explanation: "Use == to compare values; a single = assigns.".to_string(),
                });
            }
        }
    }

    issues.into_iter().min_by_key(|i| (i.line, i.pattern))
}

/// 语句头结束的冒号位置：括号外第一个 `:`（`:=` 除外）
///
/// 单行复合语句 `if x: y = 2` 中冒号之后是语句体。
fn header_colon(code: &str, from: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut chars = code[from..].char_indices().peekable();

    while let Some((offset, ch)) = chars.next() {
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ':' if depth <= 0 && chars.peek().map(|&(_, next)| next) != Some('=') => {
                return Some(from + offset);
            }
            _ => {}
        }
    }
    None
}

/// 括号配对检查：返回第一个不匹配的闭括号，或最早一个未闭合的开括号
fn bracket_issue(lines: &[ScannedLine]) -> Option<SyntaxIssue> {
    let mut stack: Vec<(char, usize)> = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        let number = index + 1;
        for ch in line.code.chars() {
            match ch {
                '(' | '[' | '{' => stack.push((ch, number)),
                ')' | ']' | '}' => {
                    let expected = match ch {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, open_line)) => {
                            // 闭括号与最近的开括号不匹配，开括号所在行更早
                            return Some(SyntaxIssue {
                                line: open_line,
                                pattern: SyntaxPattern::Bracket,
                                explanation: format!(
                                    "The bracket '{}' is closed with '{}'.",
                                    open, ch
                                ),
                            });
                        }
                        None => {
                            return Some(SyntaxIssue {
                                line: number,
                                pattern: SyntaxPattern::Bracket,
                                explanation: format!(
                                    "The closing '{}' has no matching opener.",
                                    ch
                                ),
                            });
                        }
                    }
                }
                _ => {}
            }
        }
    }

    stack.first().map(|&(open, line)| SyntaxIssue {
        line,
        pattern: SyntaxPattern::Bracket,
        explanation: format!("The bracket '{}' is never closed.", open),
    })
}

fn bracket_balance(code: &str) -> i64 {
    code.chars().fold(0, |depth, ch| match ch {
        '(' | '[' | '{' => depth + 1,
        ')' | ']' | '}' => depth - 1,
        _ => depth,
    })
}

/// 条件中是否出现单独的 `=`（排除 `==` `!=` `<=` `>=` `:=`，以及关键字参数）
fn has_bare_assignment(condition: &str) -> bool {
    let chars: Vec<char> = condition.chars().collect();
    let mut depth = 0i32;

    for (i, &ch) in chars.iter().enumerate() {
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '=' if depth == 0 => {
                let prev = if i > 0 { chars[i - 1] } else { ' ' };
                let next = chars.get(i + 1).copied().unwrap_or(' ');
                if !matches!(prev, '=' | '!' | '<' | '>' | ':') && next != '=' {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

/// 逐行扫描：去掉字符串字面量和注释，记录未闭合的单行字符串
///
/// 三引号字符串可以跨行，其内容整体视为字符串。
fn scan_lines(lines: &[&str]) -> Vec<ScannedLine> {
    let mut result = Vec::with_capacity(lines.len());
    let mut triple: Option<char> = None;

    for line in lines {
        let chars: Vec<char> = line.chars().collect();
        let mut scanned = ScannedLine::default();
        let mut quote: Option<char> = None;
        let mut i = 0;

        while i < chars.len() {
            let ch = chars[i];

            if let Some(q) = triple {
                if ch == '\\' {
                    i += 2;
                    continue;
                }
                if is_triple(&chars, i, q) {
                    triple = None;
                    scanned.code.push_str("\"\"");
                    i += 3;
                } else {
                    i += 1;
                }
                continue;
            }

            if let Some(q) = quote {
                if ch == '\\' {
                    i += 2;
                    continue;
                }
                if ch == q {
                    quote = None;
                    scanned.code.push(ch);
                }
                i += 1;
                continue;
            }

            match ch {
                '#' => {
                    scanned.has_comment = true;
                    break;
                }
                '"' | '\'' if is_triple(&chars, i, ch) => {
                    triple = Some(ch);
                    scanned.code.push(ch);
                    i += 3;
                }
                '"' | '\'' => {
                    quote = Some(ch);
                    scanned.code.push(ch);
                    i += 1;
                }
                _ => {
                    scanned.code.push(ch);
                    i += 1;
                }
            }
        }

        // 行尾续行符允许字符串跨行，这里不作为错误
        scanned.unterminated_string = quote.is_some() && !line.trim_end().ends_with('\\');
        result.push(scanned);
    }

    result
}

fn is_triple(chars: &[char], i: usize, q: char) -> bool {
    i + 2 < chars.len() && chars[i] == q && chars[i + 1] == q && chars[i + 2] == q
}
