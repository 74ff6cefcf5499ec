use crate::config::Config;
use crate::implicit_flow;
use crate::plan::{FunctionPlan, InstrumentationPlan};
use crate::policy::{self, FunctionInstrumenter};
use crate::runtime_api::{EntryPoint, RuntimeRegistry};
use crate::site::{CallArg, InstrPos, InstrumentationSite, Placement};
use crate::strings::InternedStrings;
use llvm_ir::{BasicBlock, Function, Instruction, Module, Operand};
use llvm_ir_analysis::ModuleAnalysis;
use log::{debug, info, warn};
use std::collections::HashMap;

/// Orchestrates one pass over a module: filters eligible functions, runs
/// the per-instruction policy walk and the dominator analysis on each, and
/// assembles the `InstrumentationPlan`.
pub(crate) struct ModuleInstrumenter<'m> {
    config: &'m Config,
    strings: InternedStrings,
    registry: RuntimeRegistry,
}

impl<'m> ModuleInstrumenter<'m> {
    pub fn run(module: &'m Module, config: &'m Config) -> InstrumentationPlan {
        let mut instrumenter = Self {
            config,
            strings: InternedStrings::new(),
            registry: RuntimeRegistry::new(),
        };
        // every entry point must exist before the first instruction is visited
        instrumenter.registry.declare_all();

        let mut functions = HashMap::new();
        if instrumenter.config.bypass {
            info!("instrumentation bypassed; declaring the runtime API only");
        } else {
            let analysis = ModuleAnalysis::new(module);
            for func in &module.functions {
                if !instrumenter.eligible(func) {
                    continue;
                }
                debug!("instrumenting function {:?}", func.name);
                let (mut sites, last_branch) =
                    FunctionInstrumenter::new(module, config, &mut instrumenter.strings, func).run();
                let domtree = analysis.fn_analysis(&func.name).dominator_tree();
                implicit_flow::plan_dominator_edges(func, domtree, &mut sites);
                if func.name == instrumenter.config.entry_function {
                    instrumenter.plan_argv_seed(func, &mut sites);
                }
                functions.insert(func.name.clone(), FunctionPlan { sites, last_branch });
                // the per-function location cache died with the engine;
                // nothing carries over to the next function
            }
        }

        let start = instrumenter.registry.declare(EntryPoint::TaintStart);
        InstrumentationPlan {
            functions,
            strings: instrumenter.strings,
            registry: instrumenter.registry,
            ctors: vec![start],
        }
    }

    /// Per-function eligibility filters, applied before visiting any
    /// instruction.
    fn eligible(&self, func: &Function) -> bool {
        if self.config.ignore_functions.contains(&func.name) {
            return false;
        }
        if func.name.starts_with(&self.config.runtime_function_prefix) {
            // never instrument the runtime itself
            return false;
        }
        if func.name.starts_with("llvm.") {
            return false;
        }
        if func.basic_blocks.is_empty() {
            return false;
        }
        let is_entry = func.name == self.config.entry_function;
        if func.debugloc.is_none() && !is_entry {
            return false;
        }
        if self
            .config
            .anonymous_namespace_prefixes
            .iter()
            .any(|prefix| func.name.starts_with(prefix.as_str()))
        {
            return false;
        }
        if let Some(path) = policy::function_path(func) {
            if self.config.is_excluded_path(&path) {
                return false;
            }
        }
        true
    }

    /// Wire the program's argv bytes into the taint source set, placed at
    /// the entry block's first valid instruction so nothing can use argv
    /// before it is tainted.
    fn plan_argv_seed(&mut self, func: &Function, sites: &mut Vec<InstrumentationSite>) {
        let (argc, argv) = match (func.parameters.get(0), func.parameters.get(1)) {
            (Some(argc), Some(argv)) => (argc, argv),
            _ => {
                warn!("cannot seed argv taint: {:?} does not take argc/argv", func.name);
                return;
            },
        };
        let entry = match func.basic_blocks.first() {
            Some(bb) => bb,
            None => return,
        };
        self.registry.declare(EntryPoint::TaintArgv);
        sites.push(InstrumentationSite {
            block: entry.name.clone(),
            pos: first_insertion_point(entry),
            placement: Placement::Before,
            callee: EntryPoint::TaintArgv,
            args: vec![
                CallArg::Int(Operand::LocalOperand {
                    name: argc.name.clone(),
                    ty: argc.ty.clone(),
                }),
                CallArg::Ptr(Operand::LocalOperand {
                    name: argv.name.clone(),
                    ty: argv.ty.clone(),
                }),
            ],
            capture: None,
        });
    }
}

/// The first position in a block where a call may land: after any leading
/// phi instructions.
fn first_insertion_point(bb: &BasicBlock) -> InstrPos {
    for (i, inst) in bb.instrs.iter().enumerate() {
        match inst {
            Instruction::Phi(_) => continue,
            _ => return InstrPos::Instr(i),
        }
    }
    InstrPos::Term
}
