use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Terminal outcome of a testcase, submission or hack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    PresentationError,
    RuntimeError,
    TimeLimitExceeded,
    /// The checker reported its own failure (exit code 3).
    CheckerFail,
    /// The checker exited with an unrecognised code.
    Unknown,
    /// The checker itself ran out of time.
    CheckerTimeLimitExceeded,
    CompileError,
    /// The checker failed to compile.
    CheckerCompileError,
    InternalError,
    /// The verifier rejected a hack input.
    Invalid,
    GeneratorCompileError,
    GeneratorError,
}

const ALL: [Verdict; 14] = [
    Verdict::Accepted,
    Verdict::WrongAnswer,
    Verdict::PresentationError,
    Verdict::RuntimeError,
    Verdict::TimeLimitExceeded,
    Verdict::CheckerFail,
    Verdict::Unknown,
    Verdict::CheckerTimeLimitExceeded,
    Verdict::CompileError,
    Verdict::CheckerCompileError,
    Verdict::InternalError,
    Verdict::Invalid,
    Verdict::GeneratorCompileError,
    Verdict::GeneratorError,
];

impl Verdict {
    pub fn code(self) -> &'static str {
        match self {
            Self::Accepted => "AC",
            Self::WrongAnswer => "WA",
            Self::PresentationError => "PE",
            Self::RuntimeError => "RE",
            Self::TimeLimitExceeded => "TLE",
            Self::CheckerFail => "Fail",
            Self::Unknown => "Unknown",
            Self::CheckerTimeLimitExceeded => "ITLE",
            Self::CompileError => "CE",
            Self::CheckerCompileError => "ICE",
            Self::InternalError => "IE",
            Self::Invalid => "Invalid",
            Self::GeneratorCompileError => "GCE",
            Self::GeneratorError => "GE",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        ALL.into_iter().find(|v| v.code() == code)
    }

    /// Rank used when folding case verdicts into one.
    ///
    /// Case verdicts, most severe first: IE, ICE, Fail, Unknown, ITLE, RE,
    /// TLE, WA, PE. Pipeline-level verdicts never come out of a case and
    /// rank just below IE.
    fn severity(self) -> u8 {
        match self {
            Self::Accepted => 0,
            Self::PresentationError => 1,
            Self::WrongAnswer => 2,
            Self::TimeLimitExceeded => 3,
            Self::RuntimeError => 4,
            Self::CheckerTimeLimitExceeded => 5,
            Self::Unknown => 6,
            Self::CheckerFail => 7,
            Self::CheckerCompileError => 8,
            Self::CompileError
            | Self::Invalid
            | Self::GeneratorCompileError
            | Self::GeneratorError => 9,
            Self::InternalError => 10,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Map a checker exit code to a verdict (testlib convention).
pub fn checker_verdict(exit_code: i32) -> Verdict {
    match exit_code {
        0 => Verdict::Accepted,
        1 => Verdict::WrongAnswer,
        2 => Verdict::PresentationError,
        3 => Verdict::CheckerFail,
        _ => Verdict::Unknown,
    }
}

/// Status string stored on submissions, hacks and testcase rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JudgeStatus {
    /// `-`: reset, or a testcase that was not executed.
    Waiting,
    Fetching,
    Compiling,
    Generating,
    Verifying,
    Executing,
    /// `done/total` testcases finished.
    Progress { done: usize, total: usize },
    Done(Verdict),
}

impl fmt::Display for JudgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => f.write_str("-"),
            Self::Fetching => f.write_str("Fetching"),
            Self::Compiling => f.write_str("Compiling"),
            Self::Generating => f.write_str("Generating"),
            Self::Verifying => f.write_str("Verifying"),
            Self::Executing => f.write_str("Executing"),
            Self::Progress { done, total } => write!(f, "{done}/{total}"),
            Self::Done(verdict) => f.write_str(verdict.code()),
        }
    }
}

impl FromStr for JudgeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "-" => Self::Waiting,
            "Fetching" => Self::Fetching,
            "Compiling" => Self::Compiling,
            "Generating" => Self::Generating,
            "Verifying" => Self::Verifying,
            "Executing" => Self::Executing,
            _ => {
                if let Some((done, total)) = s.split_once('/') {
                    let parse = |n: &str| n.parse::<usize>().map_err(|e| format!("{s:?}: {e}"));
                    Self::Progress {
                        done: parse(done)?,
                        total: parse(total)?,
                    }
                } else {
                    let verdict =
                        Verdict::from_code(s).ok_or_else(|| format!("unknown status {s:?}"))?;
                    Self::Done(verdict)
                }
            }
        };
        Ok(status)
    }
}

impl Serialize for JudgeStatus {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JudgeStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Graded execution of one testcase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseResult {
    pub name: String,
    pub verdict: Verdict,
    pub time: Duration,
    pub memory: u64,
    pub tle: bool,
    /// Program stderr.
    pub stderr: Vec<u8>,
    /// Checker stderr.
    pub checker_out: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    pub verdict: Verdict,
    pub time: Duration,
    pub memory: u64,
}

/// Fold executed cases into an overall verdict.
///
/// `AC` iff every case is `AC`; otherwise the most severe case verdict,
/// the earliest case winning ties. Time and memory are maxima.
pub fn aggregate(cases: &[CaseResult]) -> Aggregate {
    let mut total = Aggregate {
        verdict: Verdict::Accepted,
        time: Duration::ZERO,
        memory: 0,
    };
    for case in cases {
        total.time = total.time.max(case.time);
        total.memory = total.memory.max(case.memory);
        if case.verdict.severity() > total.verdict.severity() {
            total.verdict = case.verdict;
        }
    }
    total
}
