//! 代码分析服务
//!
//! 分两层：
//! - 请求层 `request`：构建固定格式的请求，调用文本生成能力，解析 JSON，返回 `Result<_, BackendError>`
//! - 策略层 `resolve`：决定出错时怎么降级
//!   - `Malformed` → 原始文本直接作为反馈，`source: Model`
//!   - `Unavailable` → 本地启发式分析，`source: Fallback`
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::BackendError;
use crate::models::{AnalysisResult, AnalysisSource, Insight, Severity, Submission};
use crate::services::heuristic::HeuristicAnalyzer;
use crate::services::llm_service::TextGenerator;
use crate::utils::logging::truncate_text;

const CAPABILITY: &str = "analysis";

const SYSTEM_MESSAGE: &str = r#"You are a patient programming tutor reviewing a beginner's Python code.
Reply with a single JSON object and nothing else, using exactly this shape:
{
  "summary": "two or three sentences about what the code does and how well",
  "issues": [
    {"line": 1, "snippet": "the offending code", "explanation": "what is wrong and how to fix it", "severity": "error|warning|info|tip"}
  ],
  "suggestions": ["short actionable suggestion"]
}
Line numbers refer to the numbered listing you are given. Use an empty array when there are no issues."#;

/// 模型返回的报告
#[derive(Debug, Deserialize)]
struct ModelReport {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    issues: Vec<ModelIssue>,
    #[serde(default)]
    suggestions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ModelIssue {
    #[serde(default)]
    line: Option<usize>,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    severity: String,
}

/// 代码分析服务
pub struct AnalysisService {
    generator: Arc<dyn TextGenerator>,
    heuristic: HeuristicAnalyzer,
}

impl AnalysisService {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            heuristic: HeuristicAnalyzer::new(),
        }
    }

    /// 分析一次提交（永不失败）
    pub async fn analyze(&self, submission: &Submission) -> AnalysisResult {
        let outcome = self.request(submission).await;
        self.resolve(submission, outcome)
    }

    /// 请求层：调用文本生成能力并解析
    ///
    /// # 返回
    /// - `Ok`: 解析成功的分析结果（`source: Model`）
    /// - `Err(Unavailable)`: 能力不可用
    /// - `Err(Malformed)`: 能力返回了无法解析的内容，`raw` 为原始文本
    pub async fn request(&self, submission: &Submission) -> Result<AnalysisResult, BackendError> {
        let prompt = self.build_prompt(submission.code());

        debug!("[提交 {}] 请求代码分析", submission.id());
        let raw = self.generator.generate(SYSTEM_MESSAGE, &prompt).await?;
        debug!(
            "[提交 {}] 分析原始响应: {}",
            submission.id(),
            truncate_text(&raw, 120)
        );

        self.parse_report(submission, &raw)
    }

    /// 策略层：把请求层的结果变成最终的分析结果
    pub fn resolve(
        &self,
        submission: &Submission,
        outcome: Result<AnalysisResult, BackendError>,
    ) -> AnalysisResult {
        match outcome {
            Ok(result) => {
                info!(
                    "[提交 {}] ✓ 分析完成，{} 条洞察",
                    submission.id(),
                    result.insights.len()
                );
                result
            }
            Err(BackendError::Malformed { raw, .. }) => {
                warn!("[提交 {}] ⚠️ 分析响应无法解析，直接展示原文", submission.id());
                AnalysisResult {
                    submission_id: submission.id(),
                    feedback_text: raw,
                    insights: Vec::new(),
                    source: AnalysisSource::Model,
                }
            }
            Err(err @ BackendError::Unavailable { .. }) => {
                warn!(
                    "[提交 {}] ⚠️ {}，改用本地分析",
                    submission.id(),
                    err
                );
                self.heuristic.analyze(submission)
            }
        }
    }

    /// 构建提示词：代码逐行编号，便于模型引用行号
    fn build_prompt(&self, code: &str) -> String {
        let numbered: Vec<String> = code
            .lines()
            .enumerate()
            .map(|(i, line)| format!("{:>4} | {}", i + 1, line))
            .collect();

        format!(
            "Review the following Python code.\n\n{}\n",
            numbered.join("\n")
        )
    }

    /// 解析模型返回的 JSON 报告
    fn parse_report(
        &self,
        submission: &Submission,
        raw: &str,
    ) -> Result<AnalysisResult, BackendError> {
        let malformed = || BackendError::malformed(CAPABILITY, raw.trim());

        let json = extract_json_object(raw).ok_or_else(malformed)?;
        let report: ModelReport = serde_json::from_str(json).map_err(|e| {
            debug!("[提交 {}] 分析 JSON 解析失败: {}", submission.id(), e);
            malformed()
        })?;

        if report.summary.trim().is_empty() && report.issues.is_empty() {
            return Err(malformed());
        }

        let code_lines: Vec<&str> = submission.code().lines().collect();
        let insights = report
            .issues
            .into_iter()
            .filter(|issue| !issue.explanation.trim().is_empty())
            .map(|issue| {
                let line = issue.line.unwrap_or(1).clamp(1, code_lines.len().max(1));
                let snippet = if issue.snippet.trim().is_empty() {
                    code_lines
                        .get(line - 1)
                        .map(|l| l.trim().to_string())
                        .unwrap_or_default()
                } else {
                    issue.snippet.trim().to_string()
                };
                Insight {
                    line,
                    snippet,
                    explanation: issue.explanation.trim().to_string(),
                    severity: Severity::parse_lenient(&issue.severity),
                }
            })
            .collect();

        let mut feedback_text = report.summary.trim().to_string();
        let suggestions: Vec<&str> = report
            .suggestions
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if !suggestions.is_empty() {
            if !feedback_text.is_empty() {
                feedback_text.push_str("\n\n");
            }
            feedback_text.push_str("Suggestions:");
            for suggestion in suggestions {
                feedback_text.push_str("\n- ");
                feedback_text.push_str(suggestion);
            }
        }

        Ok(AnalysisResult {
            submission_id: submission.id(),
            feedback_text,
            insights,
            source: AnalysisSource::Model,
        })
    }
}

/// 从响应中取出 JSON 对象（容忍 ```json 代码块和前后说明文字）
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}
