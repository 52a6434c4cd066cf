//! Compiler/linker flag listing

use samflash_core::board::BoardConfig;
use samflash_core::toolchain::BuildFlags;

/// Print the flag set the build engine should use for `board`
pub fn print_flags(board: &BoardConfig) {
    let flags = BuildFlags::for_board(board);

    println!("Build flags for {} ({})", board.name, board.id);
    println!("======================");
    println!();
    print_group("ASFLAGS", &flags.asflags);
    print_group("CFLAGS", &flags.cflags);
    print_group("CCFLAGS", &flags.ccflags);
    print_group("CXXFLAGS", &flags.cxxflags);
    let defines: Vec<String> = flags.cppdefines.iter().map(|d| format!("-D{}", d)).collect();
    print_group("CPPDEFINES", &defines);
    print_group("LINKFLAGS", &flags.linkflags);
    let libs: Vec<String> = flags.libs.iter().map(|l| format!("-l{}", l)).collect();
    print_group("LIBS", &libs);
}

fn print_group(name: &str, values: &[String]) {
    if values.is_empty() {
        println!("{:<11} (none)", name);
    } else {
        println!("{:<11} {}", name, values.join(" "));
    }
}
