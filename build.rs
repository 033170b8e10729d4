use vergen::EmitBuilder;

fn main() {
    // --version 的长输出使用构建时间和提交号，非 git 环境下 vergen 输出占位值
    if let Err(e) = EmitBuilder::builder()
        .build_timestamp()
        .git_sha(true)
        .emit()
    {
        println!("cargo:warning=无法生成构建信息: {}", e);
    }
}
