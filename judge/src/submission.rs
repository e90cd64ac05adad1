use chrono::Utc;
use sandbox::Volume;
use tracing::{info, warn};

use crate::context::JudgeContext;
use crate::error::JudgeResult;
use crate::lease::TaskLease;
use crate::store::{SubmissionRecord, TestcaseRecord};
use crate::testcase::{CaseContext, Program};
use crate::verdict::{JudgeStatus, Verdict, aggregate};

/// Volumes a submission judge holds until it returns.
#[derive(Default)]
struct Artifacts {
    checker: Option<Volume>,
    program: Option<Volume>,
}

impl Artifacts {
    async fn release(self, ctx: &JudgeContext) {
        for volume in [self.checker, self.program].into_iter().flatten() {
            ctx.toolchain.release(volume).await;
        }
    }
}

/// Judge (or rejudge) a submission from scratch and persist the outcome.
///
/// Contestant faults end as stored verdicts. Errors are infrastructure
/// failures; the caller records those as `IE`.
pub async fn judge_submission(
    ctx: &JudgeContext,
    lease: &mut TaskLease,
    id: i64,
    tle_knockout: bool,
) -> JudgeResult<()> {
    let mut record = ctx.store.fetch_submission(id).await?;
    let mut artifacts = Artifacts::default();
    let outcome = run(ctx, lease, &mut record, tle_knockout, &mut artifacts).await;
    artifacts.release(ctx).await;
    outcome
}

async fn run(
    ctx: &JudgeContext,
    lease: &mut TaskLease,
    record: &mut SubmissionRecord,
    tle_knockout: bool,
    artifacts: &mut Artifacts,
) -> JudgeResult<()> {
    let id = record.id;
    record.prev_status = Some(record.status.clone());
    record.status = JudgeStatus::Waiting;
    record.max_time_ms = None;
    record.max_memory = None;
    record.compile_error.clear();
    record.judged_at = None;
    ctx.store.update_submission(record).await?;
    ctx.store.clear_testcase_results(id).await?;

    record.status = JudgeStatus::Fetching;
    ctx.store.update_submission(record).await?;
    let assets = ctx.assets.fetch(&record.problem).await?;
    record.judged_version = Some(record.problem.version.clone());

    record.status = JudgeStatus::Compiling;
    ctx.store.update_submission(record).await?;
    lease.touch_if_needed().await?;

    let checker_lang = ctx.languages.checker();
    let checker = ctx
        .toolchain
        .compile(checker_lang, &assets.checker_source(), assets.include_files())
        .await?;
    let checker_ok = checker.result.success();
    let checker_stderr = checker.result.stderr;
    let checker = &*artifacts.checker.insert(checker.volume);
    if !checker_ok {
        info!(submission_id = id, "checker failed to compile");
        return finish_early(ctx, record, Verdict::CheckerCompileError, checker_stderr).await;
    }

    let lang = ctx.languages.get(&record.lang)?;
    let work = tempfile::tempdir()?;
    let source = work.path().join(&lang.source);
    tokio::fs::write(&source, &record.source).await?;
    let program = ctx.toolchain.compile(lang, &source, &[]).await?;
    let program_ok = program.result.success();
    let program_stderr = program.result.stderr;
    let program = &*artifacts.program.insert(program.volume);
    if !program_ok {
        info!(submission_id = id, "compile error");
        return finish_early(ctx, record, Verdict::CompileError, program_stderr).await;
    }
    lease.touch_if_needed().await?;

    let cases = assets.testcases();
    for (order, name) in cases.iter().enumerate() {
        ctx.store
            .save_testcase_result(&TestcaseRecord::pending(id, name, order))
            .await?;
    }

    let case_ctx = CaseContext {
        toolchain: &ctx.toolchain,
        program: Program {
            lang,
            volume: program,
        },
        checker: Program {
            lang: checker_lang,
            volume: checker,
        },
        time_limit: assets.time_limit(),
    };

    let mut results = Vec::with_capacity(cases.len());
    for (order, name) in cases.iter().enumerate() {
        record.status = JudgeStatus::Progress {
            done: order,
            total: cases.len(),
        };
        ctx.store.update_submission(record).await?;

        let case = case_ctx
            .run_case(name, &assets.input_path(name), &assets.expected_path(name))
            .await?;
        ctx.store
            .save_testcase_result(&TestcaseRecord::from_case(id, order, &case))
            .await?;
        lease.touch_if_needed().await?;

        let knocked_out = tle_knockout && case.verdict == Verdict::TimeLimitExceeded;
        results.push(case);
        if knocked_out {
            info!(submission_id = id, case = %name, "TLE knockout, skipping remaining cases");
            break;
        }
    }

    let total = aggregate(&results);
    record.status = JudgeStatus::Done(total.verdict);
    record.max_time_ms = Some(total.time.as_millis() as u64);
    record.max_memory = Some(total.memory);
    record.judged_at = Some(Utc::now());
    ctx.store.update_submission(record).await?;
    info!(
        submission_id = id,
        verdict = %total.verdict,
        time_ms = total.time.as_millis() as u64,
        memory = total.memory,
        "submission judged"
    );
    Ok(())
}

async fn finish_early(
    ctx: &JudgeContext,
    record: &mut SubmissionRecord,
    verdict: Verdict,
    compile_error: Vec<u8>,
) -> JudgeResult<()> {
    record.status = JudgeStatus::Done(verdict);
    record.compile_error = compile_error;
    record.judged_at = Some(Utc::now());
    ctx.store.update_submission(record).await
}

/// Persist `IE` for a submission whose judge failed.
pub async fn mark_internal_error(ctx: &JudgeContext, id: i64) -> JudgeResult<()> {
    let mut record = ctx.store.fetch_submission(id).await?;
    record.status = JudgeStatus::Done(Verdict::InternalError);
    record.judged_at = Some(Utc::now());
    ctx.store.update_submission(&record).await?;
    warn!(submission_id = id, "submission marked IE");
    Ok(())
}
