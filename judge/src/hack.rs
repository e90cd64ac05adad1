use std::path::{Path, PathBuf};

use chrono::Utc;
use sandbox::{Input, Output, Volume};
use tracing::{info, warn};

use crate::context::JudgeContext;
use crate::error::{JudgeError, JudgeResult};
use crate::lang::Language;
use crate::lease::TaskLease;
use crate::store::{HackInput, HackRecord};
use crate::testcase::{CaseContext, Program};
use crate::toolchain::Execution;
use crate::verdict::{JudgeStatus, Verdict};

#[derive(Default)]
struct Artifacts {
    generator: Option<Volume>,
    program: Option<Volume>,
    checker: Option<Volume>,
    model: Option<Volume>,
    verifier: Option<Volume>,
}

impl Artifacts {
    async fn release(self, ctx: &JudgeContext) {
        let volumes = [
            self.generator,
            self.program,
            self.checker,
            self.model,
            self.verifier,
        ];
        for volume in volumes.into_iter().flatten() {
            ctx.toolchain.release(volume).await;
        }
    }
}

/// Judge a hack: check its input with the verifier, then grade the
/// attacked submission on it against the model solution's output.
pub async fn judge_hack(ctx: &JudgeContext, lease: &mut TaskLease, id: i64) -> JudgeResult<()> {
    let mut hack = ctx.store.fetch_hack(id).await?;
    let mut artifacts = Artifacts::default();
    let outcome = run(ctx, lease, &mut hack, &mut artifacts).await;
    artifacts.release(ctx).await;
    outcome
}

async fn run(
    ctx: &JudgeContext,
    lease: &mut TaskLease,
    hack: &mut HackRecord,
    artifacts: &mut Artifacts,
) -> JudgeResult<()> {
    let id = hack.id;
    hack.status = JudgeStatus::Waiting;
    hack.time_ms = None;
    hack.memory = None;
    hack.stderr.clear();
    hack.judge_output.clear();
    hack.judged_at = None;
    ctx.store.update_hack(hack).await?;

    let submission = ctx.store.fetch_submission(hack.submission_id).await?;
    let assets = ctx.assets.fetch(&submission.problem).await?;
    let lang = ctx.languages.get(&submission.lang)?;
    let tool_timeout = ctx.toolchain.limits().tool_timeout;
    let work = tempfile::tempdir()?;

    hack.status = JudgeStatus::Generating;
    ctx.store.update_hack(hack).await?;
    let input = work.path().join("input.in");
    match hack.input.clone() {
        HackInput::Text(text) => tokio::fs::write(&input, text).await?,
        HackInput::Generator(source) => {
            let generator_lang = ctx.languages.generator();
            let source_path = work.path().join(&generator_lang.source);
            tokio::fs::write(&source_path, source).await?;
            let compiled = ctx
                .toolchain
                .compile(generator_lang, &source_path, assets.include_files())
                .await?;
            if !compiled.result.success() {
                hack.judge_output = compiled.result.stderr;
                artifacts.generator = Some(compiled.volume);
                return finish(ctx, hack, Verdict::GeneratorCompileError).await;
            }
            let generator = &*artifacts.generator.insert(compiled.volume);
            let generated = ctx
                .toolchain
                .execute(
                    generator_lang,
                    Execution {
                        program: generator,
                        args: Vec::new(),
                        stdin: Input::Null,
                        stdout: Output::File(input.clone()),
                        timeout: tool_timeout,
                        scratch: None,
                    },
                )
                .await?;
            if !generated.success() {
                hack.judge_output = generated.stderr;
                return finish(ctx, hack, Verdict::GeneratorError).await;
            }
        }
    }
    lease.touch_if_needed().await?;

    hack.status = JudgeStatus::Compiling;
    ctx.store.update_hack(hack).await?;

    let source = work.path().join(&lang.source);
    tokio::fs::write(&source, &submission.source).await?;
    let compiled = ctx.toolchain.compile(lang, &source, &[]).await?;
    if !compiled.result.success() {
        hack.stderr = compiled.result.stderr;
        artifacts.program = Some(compiled.volume);
        return finish(ctx, hack, Verdict::CompileError).await;
    }
    let program = &*artifacts.program.insert(compiled.volume);

    let checker_lang = ctx.languages.checker();
    let compiled = ctx
        .toolchain
        .compile(checker_lang, &assets.checker_source(), assets.include_files())
        .await?;
    if !compiled.result.success() {
        hack.judge_output = compiled.result.stderr;
        artifacts.checker = Some(compiled.volume);
        return finish(ctx, hack, Verdict::CheckerCompileError).await;
    }
    let checker = &*artifacts.checker.insert(compiled.volume);

    let model_lang = ctx.languages.model_solution();
    let model = compile_trusted(
        ctx,
        &mut artifacts.model,
        model_lang,
        &assets.model_solution_source(),
        assets.include_files(),
        "model solution",
    )
    .await?;
    let verifier_lang = ctx.languages.verifier();
    let verifier = compile_trusted(
        ctx,
        &mut artifacts.verifier,
        verifier_lang,
        &assets.verifier_source(),
        assets.include_files(),
        "verifier",
    )
    .await?;
    lease.touch_if_needed().await?;

    hack.status = JudgeStatus::Verifying;
    ctx.store.update_hack(hack).await?;
    let verified = ctx
        .toolchain
        .execute(
            verifier_lang,
            Execution {
                program: verifier,
                args: Vec::new(),
                stdin: Input::File(input.clone()),
                stdout: Output::Discard,
                timeout: tool_timeout,
                scratch: None,
            },
        )
        .await?;
    if !verified.success() {
        info!(hack_id = id, "hack input rejected by verifier");
        hack.judge_output = verified.stderr;
        return finish(ctx, hack, Verdict::Invalid).await;
    }

    let expected = work.path().join("expect.out");
    let solved = ctx
        .toolchain
        .execute(
            model_lang,
            Execution {
                program: model,
                args: Vec::new(),
                stdin: Input::File(input.clone()),
                stdout: Output::File(expected.clone()),
                timeout: tool_timeout,
                scratch: None,
            },
        )
        .await?;
    if !solved.success() {
        return Err(JudgeError::Internal(format!(
            "model solution failed on hack {id}: exit {}, tle {}",
            solved.exit_code, solved.tle
        )));
    }
    lease.touch_if_needed().await?;

    hack.status = JudgeStatus::Executing;
    ctx.store.update_hack(hack).await?;
    let case = CaseContext {
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
    }
    .run_case("hack", &input, &expected)
    .await?;

    hack.time_ms = Some(case.time.as_millis() as u64);
    hack.memory = Some(case.memory);
    hack.stderr = case.stderr;
    hack.judge_output = case.checker_out;
    finish(ctx, hack, case.verdict).await
}

/// Compile a trusted program. Failing to compile is the judge's fault.
async fn compile_trusted<'a>(
    ctx: &JudgeContext,
    slot: &'a mut Option<Volume>,
    lang: &Language,
    source: &Path,
    include_files: &[PathBuf],
    what: &str,
) -> JudgeResult<&'a Volume> {
    let compiled = ctx.toolchain.compile(lang, source, include_files).await?;
    let volume = &*slot.insert(compiled.volume);
    if !compiled.result.success() {
        return Err(JudgeError::Internal(format!(
            "{what} failed to compile: {}",
            String::from_utf8_lossy(&compiled.result.stderr)
        )));
    }
    Ok(volume)
}

async fn finish(ctx: &JudgeContext, hack: &mut HackRecord, verdict: Verdict) -> JudgeResult<()> {
    hack.status = JudgeStatus::Done(verdict);
    hack.judged_at = Some(Utc::now());
    ctx.store.update_hack(hack).await?;
    info!(hack_id = hack.id, verdict = %verdict, "hack judged");
    Ok(())
}

/// Persist `IE` for a hack whose judge failed.
pub async fn mark_internal_error(ctx: &JudgeContext, id: i64) -> JudgeResult<()> {
    let mut hack = ctx.store.fetch_hack(id).await?;
    hack.status = JudgeStatus::Done(Verdict::InternalError);
    hack.judged_at = Some(Utc::now());
    ctx.store.update_hack(&hack).await?;
    warn!(hack_id = id, "hack marked IE");
    Ok(())
}
