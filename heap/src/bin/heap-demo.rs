use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use heap::{
    FitPolicy, Heap, HeapSettings, ObjectPtr, Result, TypeLayout, WORD_SIZE,
    fatal, global,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Exercise the mark-and-sweep heap", long_about = None)]
struct Cli {
    /// More logging (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Size of the reserved heap region in bytes
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    heap_size: usize,

    /// Free list search policy
    #[arg(long, value_enum, default_value_t = Fit::First)]
    fit: Fit,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Fit {
    First,
    Best,
}

impl From<Fit> for FitPolicy {
    fn from(fit: Fit) -> Self {
        match fit {
            Fit::First => FitPolicy::FirstFit,
            Fit::Best => FitPolicy::BestFit,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Two linked pairs on the process heap, collected twice
    Pair,
    /// A ring of objects plus unreachable garbage
    Cycle {
        #[arg(long, default_value_t = 16)]
        len: usize,
        #[arg(long, default_value_t = 16)]
        garbage: usize,
    },
    /// Repeatedly build linked lists, keep some, collect the rest
    Churn {
        #[arg(long, default_value_t = 10)]
        rounds: usize,
        #[arg(long, default_value_t = 10_000)]
        objects: usize,
        /// Keep every K-th list alive into the next round
        #[arg(long, default_value_t = 4)]
        keep: usize,
    },
}

const LIST_LEN: usize = 8;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level),
    )
    .init();
}

fn pair_layout() -> Arc<TypeLayout> {
    TypeLayout::new(3 * WORD_SIZE, &[WORD_SIZE])
        .unwrap_or_else(|err| fatal(err))
        .with_name("pair")
        .shared()
}

fn node_layout() -> Arc<TypeLayout> {
    // next pointer followed by a word of payload
    TypeLayout::new(2 * WORD_SIZE, &[0])
        .unwrap_or_else(|err| fatal(err))
        .with_name("node")
        .shared()
}

fn report(heap: &Heap) {
    let alloc = heap.allocator();
    let last = heap.stats().last;
    println!(
        "allocated {:>6}  free {:>6}  carved {:>10} bytes  marked {:>6}  freed {:>6}  pause {:?}",
        alloc.allocated_len(),
        alloc.free_len(),
        alloc.free_addr() - alloc.start_addr(),
        last.marked,
        last.freed,
        last.pause
    );
}

fn run_pair(settings: HeapSettings) {
    global::init_with(settings);
    let layout = pair_layout();

    let p1 = global::new_object(&layout);
    let p2 = global::new_object(&layout);
    global::with_heap(|heap| heap.write_pointer(p2, WORD_SIZE, Some(p1)))
        .unwrap_or_else(|err| fatal(err));

    global::insert_root(p2);
    global::collect();
    let live = global::with_heap(|heap| heap.allocator().allocated_len());
    println!("p2 -> p1, rooted p2: {live} objects allocated");

    global::with_heap(|heap| heap.write_pointer(p2, WORD_SIZE, None))
        .unwrap_or_else(|err| fatal(err));
    global::insert_root(p2);
    global::collect();
    let (live, p1_alive) = global::with_heap(|heap| {
        (heap.allocator().allocated_len(), heap.is_allocated(p1))
    });
    println!(
        "p2 cleared, rooted p2: {live} objects allocated (p1 allocated: {p1_alive})"
    );
}

fn run_cycle(settings: HeapSettings, len: usize, garbage: usize) -> Result<()> {
    let mut heap = Heap::new(settings)?;
    let layout = node_layout();

    let ring = (0..len)
        .map(|_| heap.new_object(&layout))
        .collect::<Result<Vec<_>>>()?;
    for (i, &obj) in ring.iter().enumerate() {
        heap.write_pointer(obj, 0, Some(ring[(i + 1) % len]))?;
    }
    for _ in 0..garbage {
        heap.new_object(&layout)?;
    }

    if let Some(&head) = ring.first() {
        heap.insert_root(head)?;
    }
    heap.collect()?;
    report(&heap);
    heap.verify()
}

fn build_list(heap: &mut Heap, layout: &Arc<TypeLayout>) -> Result<ObjectPtr> {
    let mut head = heap.new_object(layout)?;
    for value in 1..LIST_LEN {
        let node = heap.new_object(layout)?;
        heap.write_pointer(node, 0, Some(head))?;
        heap.payload_mut(node)?[WORD_SIZE..]
            .copy_from_slice(&value.to_ne_bytes());
        head = node;
    }
    Ok(head)
}

fn run_churn(
    settings: HeapSettings,
    rounds: usize,
    objects: usize,
    keep: usize,
) -> Result<()> {
    let mut heap = Heap::new(settings)?;
    let layout = node_layout();
    let keep = keep.max(1);

    let mut retained = Vec::new();
    for round in 0..rounds {
        let mut fresh = Vec::new();
        for list in 0..objects / LIST_LEN {
            let head = build_list(&mut heap, &layout)?;
            if list % keep == 0 {
                fresh.push(head);
            }
        }

        // last round's survivors die now, this round's are kept
        retained = fresh;
        for &head in &retained {
            heap.insert_root(head)?;
        }
        heap.collect()?;

        print!("round {round:>3}: ");
        report(&heap);
    }

    let stats = heap.stats();
    println!(
        "{} collections, {} objects freed ({} bytes), average pause {:?}, max pause {:?}",
        stats.collections,
        stats.objects_freed,
        stats.bytes_freed,
        stats.average_pause(),
        stats.max_pause
    );
    heap.verify()
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = HeapSettings {
        heap_size: cli.heap_size,
        fit: cli.fit.into(),
    };

    let result = match cli.command {
        Command::Pair => {
            run_pair(settings);
            Ok(())
        }
        Command::Cycle { len, garbage } => run_cycle(settings, len, garbage),
        Command::Churn {
            rounds,
            objects,
            keep,
        } => run_churn(settings, rounds, objects, keep),
    };

    if let Err(err) = result {
        fatal(err);
    }
}
