// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Batch-script builders, one per service category.
//!
//! Every script has three sections: environment exports (native plus
//! container-runtime mirrors), an idempotent image-build block, and a
//! run block. Replica-group recipes replace the run block with one
//! dispatch per replica plus a signal-aware wait loop that keeps the
//! job allocation alive while the replicas serve.

use crate::Category;
use crate::recipe::Recipe;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Filesystem locations a script needs on the remote side.
#[derive(Debug, Clone)]
pub struct ScriptPaths {
    /// Container definition file.
    pub def_path: String,
    /// Container image file.
    pub sif_path: String,
    /// Directory receiving job and replica logs.
    pub log_dir: String,
    /// Remote base path bound into the container as the workspace.
    pub remote_base_path: String,
}

impl ScriptPaths {
    /// Derives the paths for a recipe from the remote layout.
    pub fn for_recipe(recipe: &Recipe, remote_base_path: &str, remote_recipes_dir: &str) -> Self {
        let (def_path, sif_path) = recipe.container_paths(remote_recipes_dir);
        Self {
            def_path,
            sif_path,
            log_dir: format!("{}/logs", remote_base_path.trim_end_matches('/')),
            remote_base_path: remote_base_path.trim_end_matches('/').to_string(),
        }
    }
}

/// Category-specific script generation.
///
/// The environment and image sections are shared; categories override
/// the run block and, where supported, the replica-group block.
pub trait ScriptBuilder: Send + Sync {
    /// Bash block that launches the service for a single-instance job.
    fn run_block(&self, paths: &ScriptPaths, recipe: &Recipe) -> String;

    /// Whether this category can launch replica groups.
    fn supports_replica_groups(&self) -> bool {
        false
    }

    /// Bash block launching one dispatch per replica. Only called when
    /// `supports_replica_groups` returns true.
    fn replica_group_run_block(&self, _paths: &ScriptPaths, _recipe: &Recipe) -> String {
        String::new()
    }
}

/// Returns the script builder for a category.
pub fn builder_for(category: Category) -> &'static dyn ScriptBuilder {
    match category {
        Category::Inference => &InferenceBuilder,
        Category::VectorDb => &VectorDbBuilder,
        Category::Storage => &StorageBuilder,
    }
}

/// Assembles the complete batch script for a merged recipe.
pub fn build_job_script(recipe: &Recipe, paths: &ScriptPaths) -> String {
    let builder = builder_for(recipe.category);
    let body = if recipe.is_replica_group() && builder.supports_replica_groups() {
        builder.replica_group_run_block(paths, recipe)
    } else {
        builder.run_block(paths, recipe)
    };

    let mut script = String::new();
    script.push_str("#!/bin/bash -l\n\n");
    script.push_str("# Load required modules\n");
    script.push_str("module load env/release/2023.1\n");
    script.push_str("module load Apptainer/1.2.4-GCCcore-12.3.0\n\n");
    script.push_str("# Set environment variables\n");
    script.push_str(&environment_section(&recipe.environment));
    script.push('\n');
    let _ = write!(
        script,
        r#"
echo "=== Job Debug Info ==="
echo "Job ID: $SLURM_JOB_ID"
echo "Node: $SLURMD_NODENAME"
echo "Working directory: $(pwd)"
echo "Log directory: {log_dir}"
echo "Container def: {def_path}"
echo "Container sif: {sif_path}"
echo "======================="
"#,
        log_dir = paths.log_dir,
        def_path = paths.def_path,
        sif_path = paths.sif_path,
    );
    script.push_str(&image_block(paths));
    let _ = write!(script, "\nmkdir -p {}\n", paths.log_dir);
    script.push_str(&body);
    script
}

/// Exports every recipe environment variable twice: once natively and
/// once with the `APPTAINERENV_` prefix so the container runtime
/// forwards it. Values holding shell expansions keep double quotes.
pub fn environment_section(env: &BTreeMap<String, String>) -> String {
    if env.is_empty() {
        return "# No environment variables\n".to_string();
    }
    let mut out = String::new();
    for (key, value) in env {
        let _ = writeln!(out, "export {}", quoted(key, value));
    }
    for (key, value) in env {
        let _ = writeln!(out, "export APPTAINERENV_{}", quoted(key, value));
    }
    out
}

fn quoted(key: &str, value: &str) -> String {
    if value.contains("${") || value.contains("$(") {
        format!("{key}=\"{value}\"")
    } else {
        format!("{key}='{value}'")
    }
}

/// Idempotent image build: skip when the image file is present, else
/// build under user-private scratch directories and clean up.
fn image_block(paths: &ScriptPaths) -> String {
    format!(
        r#"
# Build container if needed
if [ ! -f {sif} ]; then
    echo 'Building Apptainer image: {sif}'

    # Set up user-writable directories to avoid permission issues
    export APPTAINER_TMPDIR=/tmp/apptainer-$USER-$$
    export APPTAINER_CACHEDIR=/tmp/apptainer-cache-$USER
    export HOME=/tmp/fake-home-$USER

    mkdir -p $APPTAINER_TMPDIR $APPTAINER_CACHEDIR $HOME/.apptainer

    # Empty docker config bypasses registry authentication
    echo '{{}}' > $HOME/.apptainer/docker-config.json

    apptainer build --fix-perms --force --disable-cache --no-https {sif} {def}
    build_result=$?

    rm -rf $APPTAINER_TMPDIR $APPTAINER_CACHEDIR $HOME

    if [ $build_result -ne 0 ]; then
        echo "ERROR: Failed to build container (exit code: $build_result)"
        exit 1
    fi

    echo "Container build successful!"
fi

if [ ! -f {sif} ]; then
    echo "ERROR: Container file not found: {sif}"
    exit 1
fi
"#,
        sif = paths.sif_path,
        def = paths.def_path,
    )
}

/// Builder for inference recipes (vLLM and compatible servers).
struct InferenceBuilder;

impl ScriptBuilder for InferenceBuilder {
    fn run_block(&self, paths: &ScriptPaths, recipe: &Recipe) -> String {
        let nv_flag = if recipe.resources.gpu > 0 { "--nv" } else { "" };
        let hf_cache = format!("{}/huggingface_cache", paths.remote_base_path);
        format!(
            r#"
echo "Starting container..."
echo "Binding project workspace: {ws} -> /workspace"
echo "Binding HF cache: {hf_cache} -> /root/.cache/huggingface"

# Persistent HuggingFace cache on the shared filesystem
export HF_HOME="{hf_cache}"
mkdir -p $HF_HOME
export APPTAINERENV_HF_HOME="/root/.cache/huggingface"

APPTAINER_FLAGS="{nv_flag}"
echo "Apptainer flags: $APPTAINER_FLAGS"

env | grep -E '^VLLM_|^HF_|^CUDA_' || echo "No VLLM/HF/CUDA vars found"

apptainer run $APPTAINER_FLAGS --bind {log_dir}:/app/logs,{ws}:/workspace,{hf_cache}:/root/.cache/huggingface {sif} 2>&1
container_exit_code=$?

echo "Container exited with code: $container_exit_code"
if [ $container_exit_code -ne 0 ]; then
    echo "ERROR: Container failed to run properly"
fi

exit $container_exit_code
"#,
            ws = paths.remote_base_path,
            hf_cache = hf_cache,
            nv_flag = nv_flag,
            log_dir = paths.log_dir,
            sif = paths.sif_path,
        )
    }

    fn supports_replica_groups(&self) -> bool {
        true
    }

    fn replica_group_run_block(&self, paths: &ScriptPaths, recipe: &Recipe) -> String {
        let nv_flag = if recipe.resources.gpu > 0 { "--nv" } else { "" };
        let hf_cache = format!("{}/huggingface_cache", paths.remote_base_path);
        let gpu_per_replica = recipe.gpu_per_replica.unwrap_or(1).max(1);
        let replicas_per_node = recipe.replicas_per_node();
        let base_port = recipe.effective_base_port();
        let model = recipe
            .model
            .clone()
            .or_else(|| recipe.environment.get("VLLM_MODEL").cloned())
            .unwrap_or_else(|| "Qwen/Qwen2.5-0.5B-Instruct".to_string());
        let max_len = recipe.max_model_len.unwrap_or(4096);
        let gpu_mem = recipe.gpu_memory_utilization.unwrap_or(0.9);

        let mut script = format!(
            r#"
echo "=== Starting vLLM replica group ({replicas_per_node} replicas) ==="
export VLLM_MODEL={model}
export VLLM_MAX_MODEL_LEN={max_len}
export VLLM_GPU_MEMORY_UTILIZATION={gpu_mem}

# HuggingFace cache on the shared filesystem
export HF_CACHE_HOST="{hf_cache}"
mkdir -p $HF_CACHE_HOST
chmod 755 $HF_CACHE_HOST

echo "Node: $(hostname)"
echo "Base port: {base_port}"
echo "Model: $VLLM_MODEL"
echo "GPUs per replica: {gpu_per_replica}"

declare -a REPLICA_PIDS=()
"#,
        );

        for i in 0..replicas_per_node {
            let port = base_port + i as u16;
            let _ = write!(
                script,
                r#"
# Replica {i}: port {port}, {gpu_per_replica} GPU(s)
echo "Launching replica {i} on port {port}..."
srun --ntasks=1 --exact --gpus-per-task={gpu_per_replica} \
    apptainer exec {nv_flag} \
    --bind {log_dir}:/app/logs \
    --bind {ws}:/workspace \
    --bind $HF_CACHE_HOST:/hf_cache \
    --env HF_HOME=/hf_cache \
    {sif} bash -lc "
        export HF_HOME=/hf_cache

        python3 -m vllm.entrypoints.openai.api_server \
            --model $VLLM_MODEL \
            --host 0.0.0.0 \
            --port {port} \
            --tensor-parallel-size {gpu_per_replica} \
            --max-model-len $VLLM_MAX_MODEL_LEN \
            --gpu-memory-utilization $VLLM_GPU_MEMORY_UTILIZATION
    " > {log_dir}/vllm_${{SLURM_JOB_ID}}_replica_{i}.log 2>&1 &

REPLICA_PIDS+=($!)
echo "Replica {i} started with PID ${{REPLICA_PIDS[-1]}}"
sleep 2
"#,
                i = i,
                port = port,
                gpu_per_replica = gpu_per_replica,
                nv_flag = nv_flag,
                log_dir = paths.log_dir,
                ws = paths.remote_base_path,
                sif = paths.sif_path,
            );
        }

        // The wait loop keeps the allocation alive until the replicas
        // exit or the scheduler signals the job.
        let _ = write!(
            script,
            r#"
echo "All {replicas_per_node} replicas launched. PIDs: ${{REPLICA_PIDS[@]}}"

cleanup() {{
    echo "Received termination signal, stopping all replicas..."
    for pid in "${{REPLICA_PIDS[@]}}"; do
        if kill -0 $pid 2>/dev/null; then
            kill $pid 2>/dev/null
        fi
    done
    exit 0
}}

trap cleanup SIGTERM SIGINT

for pid in "${{REPLICA_PIDS[@]}}"; do
    wait $pid || echo "Process $pid exited with code $?"
done

echo "All replicas completed"
"#,
        );
        script
    }
}

/// Builder for vector-database recipes.
struct VectorDbBuilder;

impl ScriptBuilder for VectorDbBuilder {
    fn run_block(&self, paths: &ScriptPaths, recipe: &Recipe) -> String {
        let storage_dir = format!("{}/vector-db-storage", paths.remote_base_path);
        let port = recipe.default_port();
        format!(
            r#"
echo "Starting vector database container on port {port}..."
export VDB_STORAGE="{storage_dir}"
mkdir -p $VDB_STORAGE

apptainer run --bind {log_dir}:/app/logs,{ws}:/workspace,$VDB_STORAGE:/qdrant/storage {sif} 2>&1
container_exit_code=$?

echo "Container exited with code: $container_exit_code"
exit $container_exit_code
"#,
            port = port,
            storage_dir = storage_dir,
            log_dir = paths.log_dir,
            ws = paths.remote_base_path,
            sif = paths.sif_path,
        )
    }
}

/// Builder for storage recipes.
struct StorageBuilder;

impl ScriptBuilder for StorageBuilder {
    fn run_block(&self, paths: &ScriptPaths, _recipe: &Recipe) -> String {
        let data_dir = format!("{}/storage-data", paths.remote_base_path);
        format!(
            r#"
echo "Starting storage container..."
export STORAGE_DATA="{data_dir}"
mkdir -p $STORAGE_DATA

apptainer run --bind {log_dir}:/app/logs,{ws}:/workspace,$STORAGE_DATA:/data {sif} 2>&1
container_exit_code=$?

echo "Container exited with code: $container_exit_code"
exit $container_exit_code
"#,
            data_dir = data_dir,
            log_dir = paths.log_dir,
            ws = paths.remote_base_path,
            sif = paths.sif_path,
        )
    }
}

/// Parameters of one load-generation run dispatched to the cluster.
///
/// The generated script follows the same contract as the service
/// scripts: module loads, an idempotent image build, then the run
/// step. The run configuration is materialised as a JSON file next to
/// the logs so the in-container workers can read it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LoadGenSpec {
    /// Data-plane URL the workers send prompts to.
    pub prompt_url: String,
    /// Service under test.
    pub service_id: String,
    /// Concurrent client workers.
    pub num_clients: u32,
    /// Target request rate across all workers.
    pub requests_per_second: f64,
    /// Run duration in seconds.
    pub duration_seconds: u64,
    /// Prompt pool sampled by the workers.
    #[serde(default)]
    pub prompts: Vec<String>,
    /// Token budget per request.
    #[serde(default = "default_loadgen_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature per request.
    #[serde(default = "default_loadgen_temperature")]
    pub temperature: f64,
}

fn default_loadgen_max_tokens() -> u32 {
    100
}

fn default_loadgen_temperature() -> f64 {
    0.7
}

/// Assembles the batch script for a load-generation job.
pub fn build_load_generator_script(
    spec: &LoadGenSpec,
    remote_base_path: &str,
    group_id: u32,
) -> String {
    let base = remote_base_path.trim_end_matches('/');
    let log_dir = format!("{base}/logs");
    let sif_path = format!("{base}/containers/client.sif");
    let def_dir = format!("{base}/src/client");

    let mut run_config = serde_json::json!(spec);
    run_config["results_file"] =
        serde_json::json!(format!("/app/logs/loadgen-results-{group_id}.json"));
    let config_json =
        serde_json::to_string_pretty(&run_config).unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"#!/bin/bash -l

# Load generator job for group {group_id}

echo "Starting load test at $(date)"
echo "  Prompt URL: {prompt_url}"
echo "  Service ID: {service_id}"
echo "  Clients: {num_clients}"
echo "  Duration: {duration_seconds}s"

module load env/release/2023.1
module load Apptainer/1.2.4-GCCcore-12.3.0

if [ -z "$HOME" ]; then
    export HOME=/home/users/$USER
fi

cat > {log_dir}/loadgen-config-{group_id}.json << 'CONFIG_EOF'
{config_json}
CONFIG_EOF

if [ ! -f {sif_path} ]; then
    echo 'Building Apptainer image: {sif_path}'
    mkdir -p $(dirname {sif_path})

    export APPTAINER_TMPDIR=/tmp/apptainer-$USER-$$
    export APPTAINER_CACHEDIR=$HOME/.apptainer/cache
    mkdir -p $APPTAINER_TMPDIR $APPTAINER_CACHEDIR $HOME/.apptainer
    echo '{{}}' > $HOME/.apptainer/docker-config.json

    cd {def_dir}
    apptainer build {sif_path} client_container.def
    build_result=$?
    rm -rf $APPTAINER_TMPDIR

    if [ $build_result -ne 0 ]; then
        echo "ERROR: Failed to build container (exit code: $build_result)"
        exit 1
    fi
fi

mkdir -p {log_dir}

echo "Starting load test container..."
apptainer run \
    --bind {log_dir}:/app/logs \
    --env LOADGEN_CONFIG=/app/logs/loadgen-config-{group_id}.json \
    {sif_path} > {log_dir}/loadgen-{group_id}-container.log 2>&1
exit_code=$?

echo "Load test finished with code: $exit_code"
exit $exit_code
"#,
        group_id = group_id,
        prompt_url = spec.prompt_url,
        service_id = spec.service_id,
        num_clients = spec.num_clients,
        duration_seconds = spec.duration_seconds,
        log_dir = log_dir,
        sif_path = sif_path,
        def_dir = def_dir,
        config_json = config_json,
    )
}
