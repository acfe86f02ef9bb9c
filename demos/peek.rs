use std::error::Error;

use shm_random::SharedMemory;

const BYTES_PER_LINE: usize = 16;

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();

    let Some(shmpath) = args.get(1) else {
        let program = args.first().map_or("peek", String::as_str);
        eprintln!("usage: {} <name> [bytes]", program);
        std::process::exit(64);
    };
    let limit = match args.get(2) {
        Some(n) => n.parse()?,
        None => 256,
    };

    let shm = SharedMemory::options().read(true).open(shmpath)?;
    println!("{}: {} bytes", shm.name(), shm.len());

    let shown = &shm[..limit.min(shm.len())];
    for (line, chunk) in shown.chunks(BYTES_PER_LINE).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        println!("{:08x}  {}", line * BYTES_PER_LINE, hex.join(" "));
    }

    Ok(())
}
