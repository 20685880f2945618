use clap::Parser as ClapParser;
use std::{panic, process};

use heap::HeapSettings;
use object::{CellRef, Value};
use vm::{
    Args, Env, Error, KeywordRestType, Method, ThreadContext, Vm, VmResult,
    objects::{ArrayObject, BlockObject, HashObject, ScopeObject, StringObject, inspect},
    primitives::{self, PrimitiveDesc},
    signals,
};

const MAIN_FILE: &str = "main";

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Never collect; the heap only grows
    #[arg(long)]
    gc_disable: bool,

    /// Sweep every cell before exiting
    #[arg(long)]
    collect_all_at_exit: bool,

    /// Collect once an allocator has less than this percentage free
    #[arg(long, default_value_t = 10)]
    gc_trigger_percent: u16,

    /// Grow after a collection until this percentage is free
    #[arg(long, default_value_t = 20)]
    gc_target_percent: u16,

    /// Blocks each size class starts with
    #[arg(long, default_value_t = 4)]
    initial_blocks: usize,

    /// Additions performed by the numeric workload
    #[arg(long, default_value_t = 100_000)]
    iterations: i64,

    /// Worker threads running the numeric workload alongside the main frame
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Finish with a call that violates its arity
    #[arg(long)]
    raise: bool,

    /// Print collector statistics at exit
    #[arg(long)]
    print_stats: bool,

    /// Print the number of live objects per type at exit
    #[arg(long)]
    print_objects: bool,

    /// Values for ARGV
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

impl Cli {
    fn heap_settings(&self) -> HeapSettings {
        HeapSettings {
            initial_blocks_per_allocator: self.initial_blocks,
            min_percent_free_triggers_collection: self.gc_trigger_percent,
            min_percent_free_after_collection: self.gc_target_percent,
            gc_enabled: !self.gc_disable,
            collect_all_at_exit: self.collect_all_at_exit,
            ..HeapSettings::default()
        }
    }
}

fn main() {
    let cli = Cli::parse();
    env_logger::init();

    let settings = cli.heap_settings();
    if let Err(reason) = settings.validate() {
        eprintln!("invalid heap settings: {reason}");
        process::exit(1);
    }

    let vm = Vm::new(settings);
    signals::install();

    let status = vm.with_thread(|ctx| run_main_frame(ctx, &cli));

    if vm.heap().collect_all_at_exit() {
        // SAFETY: every attached thread has detached and nothing reads the
        // heap after this point.
        let freed = unsafe { vm.heap().collect_all() };
        log::debug!("final sweep freed {freed} cells");
    }

    process::exit(status);
}

/// Runs the top-level frame and reports its outcome. Returns the process
/// exit status.
fn run_main_frame(ctx: &ThreadContext, cli: &Cli) -> i32 {
    set_process_globals(ctx, cli);
    let env = ctx.top_env(MAIN_FILE);
    let status = match run_top_level(&env, cli) {
        Ok(value) => {
            println!("=> {}", inspect(value));
            0
        }
        Err(err) => {
            eprintln!("{MAIN_FILE}: {err} ({})", err.class_name());
            1
        }
    };
    if cli.print_stats {
        print_stats(ctx);
    }
    if cli.print_objects {
        print_objects(ctx);
    }
    status
}

fn set_process_globals(ctx: &ThreadContext, cli: &Cli) {
    let vm = ctx.vm();
    let exe = std::env::args().next().unwrap_or_default();
    let exe = ctx.allocate(StringObject::new(&exe));
    vm.set_global("$exe", Value::Ref(exe));

    let argv = ctx.allocate(ArrayObject::default());
    vm.set_global("ARGV", Value::Ref(argv));
    for arg in &cli.args {
        let value = Value::Ref(ctx.allocate(StringObject::new(arg)));
        if let Some(array) = argv.downcast::<ArrayObject>() {
            array.push(value);
        }
    }
}

fn run_top_level(env: &Env<'_>, cli: &Cli) -> VmResult<Value> {
    let prims = primitives::default_primitives();
    let add = primitive(&prims, "Integer#+");

    let workers: Vec<_> = (0..cli.threads)
        .map(|_| {
            let iterations = cli.iterations;
            env.thread().vm().spawn(move |ctx| {
                let env = ctx.top_env("worker");
                sum_to(&env, &add_method(), iterations).map(inspect)
            })
        })
        .collect();

    let sum = sum_to(env, &add, cli.iterations)?;
    let scaled = call_scale(env, sum)?;
    let found = find_first_square_above(env, 50)?;

    let results = env.allocate(ArrayObject::default());
    let rooted = Args::new(&[sum, scaled, found, Value::Ref(results)], false);
    for handle in workers {
        let text = match env.thread().join(handle) {
            Ok(result) => result?,
            Err(payload) => panic::resume_unwind(payload),
        };
        let value = Value::Ref(env.allocate(StringObject::new(&text)));
        if let Some(array) = results.downcast::<ArrayObject>() {
            array.push(value);
        }
    }

    if cli.raise {
        let scale = Method::new("scale", scale);
        scale.call(env, env.nil(), Args::empty(), None)?;
    }

    let result = HashObject::from_entries(vec![
        (env.symbol("sum"), rooted.get(0)),
        (env.symbol("scaled"), rooted.get(1)),
        (env.symbol("found"), rooted.get(2)),
        (env.symbol("workers"), rooted.get(3)),
    ]);
    Ok(Value::Ref(env.allocate(result)))
}

fn primitive(prims: &[PrimitiveDesc], name: &str) -> Method {
    match primitives::find_primitive(prims, name) {
        Some(desc) => desc.method(),
        None => unreachable!("{name} is a default primitive"),
    }
}

fn add_method() -> Method {
    primitive(&primitives::default_primitives(), "Integer#+")
}

/// `0 + 1 + ... + (n - 1)` through optimized dispatch, leaving a pair of
/// garbage behind every step.
fn sum_to(env: &Env<'_>, add: &Method, n: i64) -> VmResult<Value> {
    let mut total = Value::SmallInt(0);
    for i in 0..n {
        let step = Args::new(&[total, Value::SmallInt(i)], false);
        step.to_array(env, true);
        total = add.call(env, total, Args::new(&[Value::SmallInt(i)], false), None)?;
    }
    Ok(total)
}

/// `scale(value, factor:, offset: 0)`
fn scale(env: &Env<'_>, _self: Value, args: Args, _block: Option<CellRef>) -> VmResult<Value> {
    args.ensure_argc_is(1, true, &["factor"])?;
    args.check_keyword_args(&["factor"], &["offset"], KeywordRestType::None)?;
    let value = args.get(0);
    let factor = args.keyword_arg(env, "factor");
    let offset = if args.keyword_arg_present("offset") {
        args.keyword_arg(env, "offset")
    } else {
        Value::SmallInt(0)
    };

    let prims = primitives::default_primitives();
    let product = primitive(&prims, "Integer#*").call(env, value, Args::new(&[factor], false), None)?;
    primitive(&prims, "Integer#+").call(env, product, Args::new(&[offset], false), None)
}

fn call_scale(env: &Env<'_>, value: Value) -> VmResult<Value> {
    let keywords = env.allocate(HashObject::from_entries(vec![
        (env.symbol("factor"), Value::SmallInt(2)),
        (env.symbol("offset"), Value::SmallInt(1)),
    ]));
    let args = Args::new(&[value, Value::Ref(keywords)], true);
    Method::new("scale", scale).call(env, env.nil(), args, None)
}

/// `[[i, i * i], ...].each { |i, square| break i if square > limit }`
fn find_first_square_above(env: &Env<'_>, limit: i64) -> VmResult<Value> {
    let pairs = env.allocate(ArrayObject::default());
    let receiver = Args::new(&[Value::Ref(pairs)], false);
    for i in 0..20 {
        let pair = env.allocate(ArrayObject::new(vec![Value::SmallInt(i), Value::SmallInt(i * i)]));
        if let Some(array) = pairs.downcast::<ArrayObject>() {
            array.push(Value::Ref(pair));
        }
    }

    let scope = env.allocate(ScopeObject::new(None, vec![Value::SmallInt(0)]));
    let block = env.allocate(
        BlockObject::new(check_square, Some(scope), Value::SmallInt(limit)).with_arity(2, Some(2)),
    );
    let rooted = Args::new(&[Value::Ref(scope), Value::Ref(block)], false);

    let each = Method::new("each", each);
    let found = each.call(env, receiver.get(0), Args::empty(), Some(block))?;
    let visited = scope
        .downcast::<ScopeObject>()
        .and_then(|scope| scope.var(0))
        .unwrap_or(Value::SmallInt(0));
    log::debug!("each visited {} pairs", inspect(visited));
    drop(rooted);
    Ok(found)
}

fn each(env: &Env<'_>, receiver: Value, args: Args, _block: Option<CellRef>) -> VmResult<Value> {
    args.ensure_argc_is(0, false, &[])?;
    let items = receiver
        .as_cell()
        .and_then(|cell| cell.downcast::<ArrayObject>().map(ArrayObject::to_vec))
        .ok_or_else(|| Error::type_error("each expects an Array receiver"))?;
    for item in items {
        env.yield_block(Args::new(&[item], false))?;
    }
    Ok(receiver)
}

fn check_square(env: &Env<'_>, limit: Value, args: Args, _block: Option<CellRef>) -> VmResult<Value> {
    if let Some(cell) = env.outer() {
        if let Some(scope) = cell.downcast::<ScopeObject>() {
            let seen = scope.var(0).and_then(Value::as_i64).unwrap_or(0);
            scope.set_var(0, Value::SmallInt(seen + 1), env.nil());
        }
    }

    // Declared as `|i, square|`, so each pair arrives spread.
    let (i, square) = (args.get(0), args.get(1));

    let prims = primitives::default_primitives();
    let below = primitive(&prims, "Integer#<").call(env, limit, Args::new(&[square], false), None)?;
    if env.thread().vm().special().truthy(below) {
        return Err(env.break_with(i));
    }
    Ok(env.nil())
}

fn print_stats(ctx: &ThreadContext) {
    let heap = ctx.heap();
    let stats = heap.stats();
    let last = stats.last_cycle;
    println!(
        "gc: {} cycles, {} cells freed, {}/{} cells live",
        stats.cycles,
        stats.cells_freed,
        heap.live_cells(),
        heap.total_cells()
    );
    println!(
        "gc: last cycle {} candidates, {} roots, {} marked, {} freed in {:?}",
        last.candidates, last.roots, last.marked, last.freed, last.duration
    );
}

fn print_objects(ctx: &ThreadContext) {
    for (type_name, count) in ctx.heap().live_cells_by_type() {
        println!("{count:>10} {type_name}");
    }
}
