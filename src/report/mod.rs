//! # report
//!
//! Results of a run: which functions each call may invoke, aggregated per source line,
//! plus the per-call-site view used to rewrite indirect calls that have a single target.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::ir::{InstId, InstKind, Module, ValueId};

/// Candidate callees per source line. Append-only; a value appears at most once per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineCallees {
    lines: BTreeMap<u32, Vec<ValueId>>,
}

impl LineCallees {
    pub fn new() -> Self {
        Self {
            lines: BTreeMap::new(),
        }
    }

    /// Marks `line` as holding a call even if nothing resolves there.
    pub fn touch(&mut self, line: u32) {
        self.lines.entry(line).or_default();
    }

    pub fn record(&mut self, line: u32, callee: ValueId) {
        let callees = self.lines.entry(line).or_default();
        if !callees.contains(&callee) {
            callees.push(callee);
        }
    }

    pub fn callees(&self, line: u32) -> &[ValueId] {
        self.lines.get(&line).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Lines in ascending order.
    pub fn lines(&self) -> impl Iterator<Item = u32> + '_ {
        self.lines.keys().copied()
    }
}

/// One output line: `<line> : a, b`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSiteRecord {
    pub line: u32,
    pub callees: Vec<String>,
}

impl fmt::Display for CallSiteRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {}", self.line, self.callees.join(", "))
    }
}

/// An indirect call that can be turned into a direct call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Devirtualization {
    pub call: InstId,
    pub callee: ValueId,
}

#[derive(Debug, Clone, Default)]
pub struct Report {
    lines: LineCallees,
    sites: BTreeMap<InstId, BTreeSet<ValueId>>,
}

impl Report {
    pub fn new() -> Self {
        Self {
            lines: LineCallees::new(),
            sites: BTreeMap::new(),
        }
    }

    /// Adds the candidates resolved for `call`. Calls without a line only reach the
    /// per-site view.
    pub fn record_call(&mut self, module: &Module, call: InstId, candidates: &BTreeSet<ValueId>) {
        if let Some(line) = module.instruction(call).line {
            self.lines.touch(line);
            for callee in candidates {
                self.lines.record(line, *callee);
            }
        }
        self.sites
            .entry(call)
            .or_default()
            .extend(candidates.iter().copied());
    }

    pub fn line_callees(&self) -> &LineCallees {
        &self.lines
    }

    /// Every candidate seen at `call` across all visits.
    pub fn site_targets(&self, call: InstId) -> Option<&BTreeSet<ValueId>> {
        self.sites.get(&call)
    }

    /// One record per line, ascending. Names are sorted and deduplicated;
    /// anonymous candidates are left out.
    pub fn records(&self, module: &Module) -> Vec<CallSiteRecord> {
        self.lines
            .lines()
            .map(|line| {
                let names: BTreeSet<&str> = self
                    .lines
                    .callees(line)
                    .iter()
                    .map(|callee| module.value(*callee).name.as_str())
                    .filter(|name| !name.is_empty())
                    .collect();
                CallSiteRecord {
                    line,
                    callees: names.into_iter().map(str::to_owned).collect(),
                }
            })
            .collect()
    }

    /// Indirect call sites whose only candidate is one named function.
    pub fn devirtualization_plan(&self, module: &Module) -> Vec<Devirtualization> {
        let mut plan = Vec::new();
        for (call, targets) in self.sites.iter() {
            let callee = match &module.instruction(*call).kind {
                InstKind::Call { callee, .. } => *callee,
                kind => panic!("call site recorded for a non-call instruction: {:?}", kind),
            };
            if module.value(callee).as_function().is_some() || targets.len() != 1 {
                continue;
            }
            for target in targets {
                if !module.value(*target).is_anonymous() {
                    plan.push(Devirtualization {
                        call: *call,
                        callee: *target,
                    });
                }
            }
        }
        plan
    }

    /// Rewrites the planned call sites to call their target directly.
    pub fn apply(&self, module: &mut Module) -> Vec<Devirtualization> {
        let plan = self.devirtualization_plan(module);
        for rewrite in plan.iter() {
            module.set_callee(rewrite.call, rewrite.callee);
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ModuleBuilder;
    use pretty_assertions::assert_eq;

    struct Fixture {
        module: Module,
        indirect: InstId,
        direct: InstId,
        silent: InstId,
        plus: ValueId,
        minus: ValueId,
        anon: ValueId,
    }

    fn fixture() -> Fixture {
        let mut mb = ModuleBuilder::new();
        let plus = mb.function("plus", false);
        let minus = mb.function("minus", false);
        let anon = mb.function("", false);
        let main = mb.function("main", false);
        let fp = mb.param(main, "fp", true);
        let entry = mb.block(main, "entry");
        let plus = mb.function_value(plus);
        let minus = mb.function_value(minus);
        let anon = mb.function_value(anon);
        mb.set_line(Some(9));
        let indirect = mb.call(entry, fp, &[], "", false);
        mb.set_line(Some(4));
        let direct = mb.call(entry, plus, &[], "", false);
        mb.set_line(None);
        let silent = mb.call(entry, fp, &[], "", false);
        let module = mb.finish();
        let inst = |v: ValueId| module.value(v).as_instruction().unwrap();
        let (indirect, direct, silent) = (inst(indirect), inst(direct), inst(silent));
        Fixture {
            module,
            indirect,
            direct,
            silent,
            plus,
            minus,
            anon,
        }
    }

    fn set(values: &[ValueId]) -> BTreeSet<ValueId> {
        values.iter().copied().collect()
    }

    #[test]
    fn test_records_sorted_by_line_and_name() {
        let fx = fixture();
        let mut report = Report::new();
        report.record_call(&fx.module, fx.indirect, &set(&[fx.plus, fx.minus]));
        report.record_call(&fx.module, fx.direct, &set(&[fx.plus]));
        report.record_call(&fx.module, fx.indirect, &set(&[fx.minus]));
        let records = report.records(&fx.module);
        assert_eq!(
            records,
            vec![
                CallSiteRecord {
                    line: 4,
                    callees: vec!["plus".to_owned()]
                },
                CallSiteRecord {
                    line: 9,
                    callees: vec!["minus".to_owned(), "plus".to_owned()]
                },
            ]
        );
        assert_eq!(records[1].to_string(), "9 : minus, plus");
        assert_eq!(report.line_callees().callees(9).len(), 2);
    }

    #[test]
    fn test_anonymous_candidate_leaves_no_dangling_separator() {
        let fx = fixture();
        let mut report = Report::new();
        report.record_call(&fx.module, fx.indirect, &set(&[fx.anon, fx.plus]));
        let records = report.records(&fx.module);
        assert_eq!(records[0].to_string(), "9 : plus");

        let mut report = Report::new();
        report.record_call(&fx.module, fx.indirect, &set(&[]));
        assert_eq!(report.records(&fx.module)[0].to_string(), "9 : ");
    }

    #[test]
    fn test_calls_without_line_only_reach_site_view() {
        let fx = fixture();
        let mut report = Report::new();
        report.record_call(&fx.module, fx.silent, &set(&[fx.plus]));
        assert_eq!(report.line_callees().lines().count(), 0);
        assert!(report.records(&fx.module).is_empty());
        assert_eq!(report.site_targets(fx.silent), Some(&set(&[fx.plus])));
    }

    #[test]
    fn test_devirtualization_plan_and_apply() {
        let fx = fixture();
        let mut report = Report::new();
        report.record_call(&fx.module, fx.indirect, &set(&[fx.minus]));
        report.record_call(&fx.module, fx.direct, &set(&[fx.plus]));
        report.record_call(&fx.module, fx.silent, &set(&[fx.plus, fx.minus]));
        let plan = report.devirtualization_plan(&fx.module);
        assert_eq!(
            plan,
            vec![Devirtualization {
                call: fx.indirect,
                callee: fx.minus
            }]
        );

        let mut module = fx.module.clone();
        let applied = report.apply(&mut module);
        assert_eq!(applied, plan);
        match &module.instruction(fx.indirect).kind {
            InstKind::Call { callee, .. } => assert_eq!(*callee, fx.minus),
            kind => panic!("unexpected {:?}", kind),
        }
    }

    #[test]
    fn test_anonymous_single_target_is_not_devirtualized() {
        let fx = fixture();
        let mut report = Report::new();
        report.record_call(&fx.module, fx.indirect, &set(&[fx.anon]));
        assert!(report.devirtualization_plan(&fx.module).is_empty());
    }
}
