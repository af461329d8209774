fn main() {
    // Export this binary's symbol table to objects it `dlopen()`s, so that
    // testers pick up our `exit`/`__assert_fail`/`testFailure` overrides
    // instead of glibc's own (spec §4.5).
    println!("cargo:rustc-link-arg-bin=ccheck=-rdynamic");
}
